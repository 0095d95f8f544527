//! Release descriptor as served by the GitHub releases API.

use serde::Deserialize;

pub const API_VERSION: &str = "2022-11-28";
const ACCEPT: &str = "application/vnd.github+json";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub browser_download_url: String,
}

impl ReleaseDescriptor {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// The asset whose name is exactly `name`.
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }
}

/// Request headers for the descriptor endpoint. The token is omitted when unset.
pub fn descriptor_headers(token: &str, user_agent: &str) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("Accept", ACCEPT.to_string()),
        ("X-GitHub-Api-Version", API_VERSION.to_string()),
        ("User-Agent", user_agent.to_string()),
    ];
    if !token.is_empty() {
        headers.push(("Authorization", format!("Bearer {}", token)));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_exact_asset_name() {
        let descriptor = ReleaseDescriptor::parse(
            r#"{
                "tag_name": "v1.2.0",
                "name": "ignored",
                "assets": [
                    {"name": "firmware.bin.sha256", "browser_download_url": "https://x/sha"},
                    {"name": "firmware.bin", "browser_download_url": "https://x/fw", "size": 10}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(descriptor.tag_name, "v1.2.0");
        assert_eq!(
            descriptor.asset("firmware.bin").unwrap().browser_download_url,
            "https://x/fw"
        );
        assert!(descriptor.asset("firmware").is_none());
    }

    #[test]
    fn token_header_only_when_configured() {
        assert!(!descriptor_headers("", "edgenode")
            .iter()
            .any(|(name, _)| *name == "Authorization"));
        assert!(descriptor_headers("t0k", "edgenode")
            .contains(&("Authorization", "Bearer t0k".to_string())));
    }
}
