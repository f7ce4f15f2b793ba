//! Manifest templates for validation run resources
//!
//! Templates are embedded at compile time and rendered with minijinja against
//! the run's [`ValidationConfig`]. Undefined variables are an error so a
//! template typo fails the run instead of producing a half-empty manifest.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use minijinja::{context, Environment, UndefinedBehavior};
use serde::de::DeserializeOwned;

use super::{ValidationConfig, WEB_SERVER_NAME};
use crate::Error;

const WEB_SERVER_DEPLOYMENT: &str = "web-server-deployment";
const WEB_SERVER_CONFIG: &str = "web-server-config";

const WEB_SERVER_DEPLOYMENT_TEMPLATE: &str = include_str!("../../templates/nginx-deploy.yaml");
const WEB_SERVER_CONFIG_TEMPLATE: &str = include_str!("../../templates/nginx-config.yaml");

/// Renders the manifests a validation run creates
pub struct ManifestTemplates {
    env: Environment<'static>,
}

impl ManifestTemplates {
    /// Load the embedded templates
    pub fn new() -> Result<Self, Error> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        for (name, source) in [
            (WEB_SERVER_DEPLOYMENT, WEB_SERVER_DEPLOYMENT_TEMPLATE),
            (WEB_SERVER_CONFIG, WEB_SERVER_CONFIG_TEMPLATE),
        ] {
            env.add_template(name, source).map_err(|e| {
                Error::template(format!("failed to parse template {:?}: {}", name, e))
            })?;
        }
        Ok(Self { env })
    }

    /// Render a named template to YAML text
    pub fn render(&self, name: &str, config: &ValidationConfig) -> Result<String, Error> {
        let template = self
            .env
            .get_template(name)
            .map_err(|e| Error::template(format!("failed to load template {:?}: {}", name, e)))?;

        template
            .render(context! {
                namespace => &config.namespace,
                image => &config.web_server_image,
                networks => config.network_selection(),
                web_server_name => WEB_SERVER_NAME,
            })
            .map_err(|e| Error::template(format!("failed to render template {:?}: {}", name, e)))
    }

    /// Web server Deployment for the run
    pub fn web_server_deployment(&self, config: &ValidationConfig) -> Result<Deployment, Error> {
        self.render_as(WEB_SERVER_DEPLOYMENT, config)
    }

    /// nginx ConfigMap mounted by the web server
    pub fn web_server_config(&self, config: &ValidationConfig) -> Result<ConfigMap, Error> {
        self.render_as(WEB_SERVER_CONFIG, config)
    }

    fn render_as<T: DeserializeOwned>(
        &self,
        name: &str,
        config: &ValidationConfig,
    ) -> Result<T, Error> {
        let yaml = self.render(name, config)?;
        serde_yaml::from_str(&yaml).map_err(|e| {
            Error::serialization(format!("failed to unmarshal {} template: {}", name, e))
        })
    }
}
