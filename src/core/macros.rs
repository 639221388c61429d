//! Macros for declaring state enums.

/// Generate a `State` trait implementation for a fieldless enum.
///
/// Besides the derives written on the enum itself, the macro always derives
/// `Clone`, `PartialEq`, `Debug`, `Serialize` and `Deserialize`, which the
/// `State` trait requires.
///
/// # Example
///
/// ```
/// use laundry_machine::state_enum;
/// use laundry_machine::core::State;
///
/// state_enum! {
///     #[derive(Copy, Eq)]
///     pub enum LidState {
///         Open,
///         Closed,
///         Broken,
///     }
///     final: [Broken]
///     error: [Broken]
/// }
///
/// assert_eq!(LidState::Closed.name(), "Closed");
/// assert!(LidState::Broken.is_error());
/// ```
#[macro_export]
macro_rules! state_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident
            ),* $(,)?
        }

        $(final: [$($final:ident),* $(,)?])?
        $(error: [$($error:ident),* $(,)?])?
    ) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant
            ),*
        }

        impl $crate::core::State for $name {
            fn name(&self) -> &str {
                match self {
                    $(Self::$variant => stringify!($variant)),*
                }
            }

            fn is_final(&self) -> bool {
                match self {
                    $($(Self::$final => true,)*)?
                    #[allow(unreachable_patterns)]
                    _ => false,
                }
            }

            fn is_error(&self) -> bool {
                match self {
                    $($(Self::$error => true,)*)?
                    #[allow(unreachable_patterns)]
                    _ => false,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::core::State::name(self))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::core::State;

    state_enum! {
        #[derive(Copy, Eq, Hash)]
        enum TestState {
            Filling,
            Rinsing,
            Drained,
            Flooded,
        }
        final: [Drained, Flooded]
        error: [Flooded]
    }

    #[test]
    fn state_enum_macro_generates_trait() {
        let state = TestState::Filling;
        assert_eq!(state.name(), "Filling");
        assert!(!state.is_final());
        assert!(!state.is_error());

        assert!(TestState::Drained.is_final());
        assert!(!TestState::Drained.is_error());

        assert!(TestState::Flooded.is_final());
        assert!(TestState::Flooded.is_error());
    }

    #[test]
    fn state_enum_generates_display() {
        assert_eq!(TestState::Rinsing.to_string(), "Rinsing");
    }

    #[test]
    fn state_enum_works_without_final_error() {
        state_enum! {
            enum MinimalState {
                One,
                Two,
            }
        }

        let state = MinimalState::Two;
        assert!(!state.is_final());
        assert!(!state.is_error());
        assert!(!MinimalState::One.is_final());
    }
}
