use super::models::EnvironmentConfig;
use super::runner::CommandSpec;
use crate::error::PipelineStageError;
use async_trait::async_trait;
use std::time::Duration;

/// Hosting platforms with a deploy CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPlatform {
    Vercel,
    Netlify,
}

/// Platform credentials, passed to the CLI through its environment.
#[derive(Debug, Clone, Default)]
pub struct PlatformTokens {
    pub vercel: Option<String>,
    pub netlify: Option<String>,
}

impl DeployPlatform {
    pub fn parse(name: &str) -> Result<Self, PipelineStageError> {
        match name.to_ascii_lowercase().as_str() {
            "vercel" => Ok(DeployPlatform::Vercel),
            "netlify" => Ok(DeployPlatform::Netlify),
            _ => Err(PipelineStageError::UnsupportedPlatform(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeployPlatform::Vercel => "vercel",
            DeployPlatform::Netlify => "netlify",
        }
    }

    pub fn deploy_command(&self, env: &EnvironmentConfig, tokens: &PlatformTokens) -> CommandSpec {
        match self {
            DeployPlatform::Vercel => {
                let mut spec = CommandSpec::new("vercel", ["deploy", "--yes"]);
                if env.production {
                    spec = spec.arg("--prod");
                }
                if let Some(token) = &tokens.vercel {
                    spec = spec.env("VERCEL_TOKEN", token);
                }
                spec
            }
            DeployPlatform::Netlify => {
                let mut spec = CommandSpec::new("netlify", ["deploy", "--dir"])
                    .arg(env.output_dir.display().to_string());
                if env.production {
                    spec = spec.arg("--prod");
                }
                if let Some(token) = &tokens.netlify {
                    spec = spec.env("NETLIFY_AUTH_TOKEN", token);
                }
                spec
            }
        }
    }
}

/// Last `https://` URL printed by a deploy CLI.
pub fn extract_deploy_url(stdout: &str) -> Option<String> {
    stdout
        .split_whitespace()
        .filter(|w| w.starts_with("https://"))
        .last()
        .map(|w| w.trim_end_matches(['.', ',']).to_string())
}

/// Checks that a freshly deployed site answers.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// HTTP status of a GET to `url`, or a transport error description.
    async fn probe(&self, url: &str) -> Result<u16, String>;
}

pub struct HttpReachabilityProbe {
    client: reqwest::Client,
}

impl HttpReachabilityProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpReachabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn probe(&self, url: &str) -> Result<u16, String> {
        self.client
            .get(url)
            .send()
            .await
            .map(|r| r.status().as_u16())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_platform() {
        assert_eq!(DeployPlatform::parse("Vercel").unwrap(), DeployPlatform::Vercel);
        assert_eq!(DeployPlatform::parse("netlify").unwrap(), DeployPlatform::Netlify);
        assert_eq!(
            DeployPlatform::parse("heroku").unwrap_err(),
            PipelineStageError::UnsupportedPlatform("heroku".to_string())
        );
    }

    #[test]
    fn test_deploy_commands() {
        let mut env = EnvironmentConfig::new("production", "main", "/srv/app");
        let tokens = PlatformTokens {
            vercel: Some("vt".to_string()),
            netlify: Some("nt".to_string()),
        };
        let vercel = DeployPlatform::Vercel.deploy_command(&env, &tokens);
        assert_eq!(vercel.display(), "vercel deploy --yes --prod");
        assert_eq!(vercel.env, vec![("VERCEL_TOKEN".to_string(), "vt".to_string())]);

        env.production = false;
        let netlify = DeployPlatform::Netlify.deploy_command(&env, &tokens);
        assert_eq!(netlify.display(), "netlify deploy --dir dist");
    }

    #[test]
    fn test_extract_deploy_url() {
        let out = "Inspect: https://vercel.com/acme/app/abc\nProduction: https://app.example.com.\n";
        assert_eq!(extract_deploy_url(out), Some("https://app.example.com".to_string()));
        assert_eq!(extract_deploy_url("done"), None);
    }
}
