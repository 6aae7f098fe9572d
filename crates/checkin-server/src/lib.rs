//! Command line handling shared by the `checkin-server` and `checkin-client`
//! binaries

#![warn(missing_docs)]

use std::path::PathBuf;

use checkin_core::Config;
use eyre::{bail, eyre, Result, WrapErr};

/// Command line options
#[derive(Debug)]
pub struct Opts {
    /// Configuration of the check-in system
    pub config: Config,

    /// Write a database of this many sample passengers and exit
    pub seed: Option<usize>,
}

impl Opts {
    /// Parse the process arguments on top of [`Config::load`]
    pub fn from_args() -> Result<Self> {
        let config = Config::load().wrap_err("loading configuration")?;
        Self::parse(config, std::env::args().skip(1))
    }

    /// Parse `args` (without the program name) on top of `config`
    pub fn parse<I>(config: Config, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut opts = Opts { config, seed: None };

        let mut option: Option<String> = None;
        for arg in args {
            if let Some(opt) = option.take() {
                match opt.as_str() {
                    "-fifo" => opts.config.fifo = PathBuf::from(arg),
                    "-database" => opts.config.database = PathBuf::from(arg),
                    "-max-wait" => {
                        opts.config.max_wait = arg
                            .parse()
                            .map_err(|_| eyre!("-max-wait takes a decimal u32"))?
                    }
                    "-seed" => {
                        opts.seed = Some(
                            arg.parse()
                                .map_err(|_| eyre!("-seed takes a number of passengers"))?,
                        )
                    }
                    _ => bail!("unknown option {opt}"),
                }
            } else {
                option = Some(arg);
            }
        }
        if let Some(opt) = option {
            bail!("option {opt} needs a value");
        }

        opts.config = opts.config.validate()?;
        Ok(opts)
    }
}

/// Send log lines to stderr, keeping stdout for the passenger dialogue
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn options_override_config() {
        let opts = Opts::parse(
            Config::default(),
            args(&["-fifo", "/tmp/a.fifo", "-max-wait", "2", "-seed", "4"]),
        )
        .unwrap();
        assert_eq!(opts.config.fifo, PathBuf::from("/tmp/a.fifo"));
        assert_eq!(opts.config.max_wait, 2);
        assert_eq!(opts.seed, Some(4));
    }

    #[test]
    fn bad_options_are_errors() {
        for list in [
            &["-max-wait"][..],
            &["-max-wait", "soon"],
            &["-max-wait", "0"],
            &["-seats", "3"],
        ] {
            assert!(Opts::parse(Config::default(), args(list)).is_err(), "{list:?}");
        }
    }
}
