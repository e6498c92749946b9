//! Runtime configuration, set from environment variables.
//!
//! Each setting carries its default and a validator that must accept a
//! value before an environment override is applied. No command-line
//! variant, since this is an embeddable library, not a standalone binary.

use std::fmt::Debug;
use std::str::FromStr;

/// A single configuration value together with the validator that must
/// accept it before an override from the environment is applied.
#[derive(Clone)]
pub struct BocOption<T: Debug + Clone> {
    value: T,
    validator: fn(&T) -> bool,
}

impl<T: Debug + Clone> BocOption<T> {
    fn new(value: T, validator: fn(&T) -> bool) -> Self {
        Self { value, validator }
    }

    fn set(&mut self, value: T) -> bool {
        if (self.validator)(&value) {
            self.value = value;
            true
        } else {
            false
        }
    }
}

impl<T: Debug + Clone> std::ops::Deref for BocOption<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

fn at_least_one(threads: &usize) -> bool {
    *threads >= 1
}

macro_rules! options {
    ($($name:ident: $type:ty[env_var: $env_var:expr][$validator:expr] = $default:expr),* $(,)?) => {
        #[derive(Clone)]
        pub struct Options {
            $(pub $name: BocOption<$type>),*
        }

        impl Options {
            fn new() -> Self {
                Options {
                    $($name: BocOption::new($default, $validator)),*
                }
            }

            /// Reads `BOC_`-prefixed environment variables and applies any
            /// that name a known option and parse to a valid value.
            /// Unrecognised `BOC_` variables and unparsable or invalid
            /// values are ignored with a warning logged through the `log`
            /// facade, never a panic — misconfiguration should degrade to
            /// defaults, not abort the embedding program.
            pub fn read_env_var_settings(&mut self) {
                const PREFIX: &str = "BOC_";
                for (key, val) in std::env::vars() {
                    let Some(rest) = key.strip_prefix(PREFIX) else {
                        continue;
                    };
                    let lowercase = rest.to_lowercase();
                    match lowercase.as_str() {
                        $(stringify!($name) => {
                            match val.parse::<$type>() {
                                Ok(parsed) => {
                                    if !self.$name.set(parsed) {
                                        log::warn!(
                                            "ignoring {key}={val:?}: value rejected by validator",
                                        );
                                    }
                                }
                                Err(_) => {
                                    log::warn!("ignoring {key}={val:?}: could not parse value");
                                }
                            }
                        })*
                        _ => log::warn!("ignoring unknown environment option {key}"),
                    }
                }
            }
        }

        impl Default for Options {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

options! {
    /// Number of scheduler worker threads. Defaults to the number of
    /// logical CPUs available.
    worker_threads: usize[env_var: "BOC_WORKER_THREADS"][at_least_one] = num_cpus::get(),
}

impl Options {
    pub fn from_env() -> Self {
        let mut options = Self::new();
        options.read_env_var_settings();
        options
    }
}
