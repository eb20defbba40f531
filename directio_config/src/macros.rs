/// Declares the `ConfigValueGroup` struct of a configuration group module.
///
/// ```ignore
/// directio_config::config_group!({
///     /// Doc comments carry over to the field.
///     ref retry_max_attempts: usize = 3;
/// });
/// ```
///
/// Each field is overridable through `DIRECTIO_<GROUP>_<FIELD>`, where `<GROUP>` is the last segment of
/// the declaring module's path, or through any alias listed in [`crate::ENVIRONMENT_NAME_ALIASES`].
#[macro_export]
macro_rules! config_group {
    ({
        $(
            $(#[$meta:meta])*
            ref $name:ident : $type:ty = $value:expr;
        )+
    }) => {
        #[allow(unused_imports)]
        use $crate::ParsableConfigValue;

        const GROUP_ENV_PREFIX: &str = const_str::concat!(
            "DIRECTIO_",
            const_str::convert_ascii_case!(upper, konst::string::rsplit_once(module_path!(), "::").unwrap().1),
            "_"
        );

        #[derive(Debug, Clone)]
        pub struct ConfigValueGroup {
            $(
                $(#[$meta])*
                pub $name: $type,
            )+
        }

        impl Default for ConfigValueGroup {
            fn default() -> Self {
                Self { $( $name: $value, )+ }
            }
        }

        impl AsRef<ConfigValueGroup> for ConfigValueGroup {
            fn as_ref(&self) -> &ConfigValueGroup {
                self
            }
        }

        impl ConfigValueGroup {
            /// Environment variables read by [`Self::apply_env_overrides`], in field order.
            pub const ENV_VARS: &'static [&'static str] = &[
                $( const_str::concat!(GROUP_ENV_PREFIX, const_str::convert_ascii_case!(upper, stringify!($name))), )+
            ];

            pub fn new() -> Self {
                Self::default()
            }

            /// Overwrites every field whose variable is set and parses; other fields keep their current value.
            pub fn apply_env_overrides(&mut self) {
                let mut vars = Self::ENV_VARS.iter();
                $(
                    if let Some(var) = vars.next() {
                        let current = self.$name.clone();
                        self.$name = <$type>::parse(var, $crate::env_value(var), current);
                    }
                )+
            }
        }
    };
}
