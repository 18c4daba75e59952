//! Optional integrations, registered in a table at startup.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{
    commands::{CommandRequest, CommandSpec},
    config::Config,
    errors::Error,
    Result,
};

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Commands this plugin answers, with their role gates.
    fn commands(&self) -> Vec<CommandSpec>;

    async fn handle(&self, req: CommandRequest) -> Result<String>;
}

/// Builds a plugin from config; `Ok(None)` means "not configured, skip".
pub type PluginFactory = fn(&Config) -> Result<Option<Arc<dyn Plugin>>>;

#[derive(Default)]
pub struct PluginRegistry {
    factories: Vec<(&'static str, PluginFactory)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, key: &'static str, factory: PluginFactory) -> Self {
        self.factories.push((key, factory));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.iter().map(|(k, _)| *k)
    }

    /// Instantiate every enabled plugin. Naming an unregistered key in
    /// `PLUGINS` is a config error.
    pub fn build(&self, cfg: &Config) -> Result<Vec<Arc<dyn Plugin>>> {
        if let Some(wanted) = &cfg.plugins {
            if let Some(unknown) = wanted.iter().find(|w| !self.keys().any(|k| k == w.as_str())) {
                return Err(Error::Config(format!(
                    "PLUGINS names unknown plugin `{unknown}` (known: {})",
                    self.keys().collect::<Vec<_>>().join(", ")
                )));
            }
        }

        let mut out = Vec::new();
        for (key, factory) in &self.factories {
            if !cfg.plugin_enabled(key) {
                info!(plugin = key, "plugin disabled");
                continue;
            }
            match factory(cfg)? {
                Some(plugin) => {
                    info!(plugin = key, commands = plugin.commands().len(), "plugin loaded");
                    out.push(plugin);
                }
                None => info!(plugin = key, "plugin not configured, skipping"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::commands::ADMIN_ONLY;

    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn commands(&self) -> Vec<CommandSpec> {
            vec![CommandSpec {
                name: "echo",
                description: "Repeat the arguments",
                roles: ADMIN_ONLY,
            }]
        }

        async fn handle(&self, req: CommandRequest) -> Result<String> {
            Ok(req.args)
        }
    }

    fn echo_factory(_: &Config) -> Result<Option<Arc<dyn Plugin>>> {
        Ok(Some(Arc::new(Echo)))
    }

    fn absent_factory(_: &Config) -> Result<Option<Arc<dyn Plugin>>> {
        Ok(None)
    }

    fn config(plugins: Option<&str>) -> Config {
        let mut vars = HashMap::from([("TELEGRAM_BOT_TOKEN", "t".to_string())]);
        if let Some(p) = plugins {
            vars.insert("PLUGINS", p.to_string());
        }
        Config::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::new()
            .register("echo", echo_factory)
            .register("absent", absent_factory)
    }

    #[test]
    fn builds_configured_plugins_only() {
        let built = registry().build(&config(None)).unwrap();
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name(), "echo");
    }

    #[test]
    fn respects_plugin_filter() {
        assert!(registry().build(&config(Some("absent"))).unwrap().is_empty());
    }

    #[test]
    fn unknown_plugin_key_is_an_error() {
        assert!(matches!(
            registry().build(&config(Some("echo,fax"))),
            Err(Error::Config(_))
        ));
    }
}
