//! Stage planning: what the next re-exec of the binary looks like.

use corral_common::config::RuntimeConfig;
use corral_common::error::Result;
use corral_common::types::Stage;

/// Flag carrying the serialized [`RuntimeConfig`] to the next stage.
pub const CONFIG_FLAG: &str = "--config";

/// A re-exec of the binary into `stage`, running `argv` at the end of the chain.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Stage the new process runs.
    pub stage: Stage,
    /// Configuration every stage of this instance shares.
    pub config: &'a RuntimeConfig,
    /// The user's command and its arguments.
    pub argv: &'a [String],
}

impl<'a> Invocation<'a> {
    /// Plans the invocation that follows `current`, if the chain continues.
    #[must_use]
    pub fn after(current: Stage, config: &'a RuntimeConfig, argv: &'a [String]) -> Option<Self> {
        current
            .next(&config.isolation.namespaces)
            .map(|stage| Self {
                stage,
                config,
                argv,
            })
    }

    /// Arguments (without `argv[0]`) that select the stage in the CLI.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn args(&self) -> Result<Vec<String>> {
        let mut args = Vec::with_capacity(self.argv.len() + 4);
        args.push(self.stage.as_token().to_string());
        args.push(CONFIG_FLAG.to_string());
        args.push(self.config.to_json()?);
        args.push("--".to_string());
        args.extend(self.argv.iter().cloned());
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_common::types::ContainerId;

    fn argv() -> Vec<String> {
        vec!["/bin/echo".into(), "--flag-like".into(), "hello".into()]
    }

    #[test]
    fn launcher_plans_init_then_workload() {
        let config = RuntimeConfig::for_instance(ContainerId::new("abc"), "/srv/rootfs");
        let argv = argv();
        let first = Invocation::after(Stage::Launcher, &config, &argv).unwrap();
        assert_eq!(first.stage, Stage::Init);
        let second = Invocation::after(first.stage, &config, &argv).unwrap();
        assert_eq!(second.stage, Stage::Workload);
        assert!(Invocation::after(second.stage, &config, &argv).is_none());
    }

    #[test]
    fn args_carry_config_and_command_verbatim() {
        let config = RuntimeConfig::for_instance(ContainerId::new("abc"), "/srv/rootfs");
        let argv = argv();
        let args = Invocation::after(Stage::Init, &config, &argv)
            .unwrap()
            .args()
            .unwrap();

        assert_eq!(args[0], "workload");
        assert_eq!(args[1], CONFIG_FLAG);
        assert_eq!(RuntimeConfig::from_json(&args[2]).unwrap(), config);
        assert_eq!(args[3], "--");
        assert_eq!(&args[4..], argv.as_slice());
    }
}
