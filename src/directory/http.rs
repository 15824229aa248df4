use super::{CharacterDirectory, DirectoryError};
use crate::descriptor::CharacterDescriptor;
use crate::simulation::Owner;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Roster envelope returned by the directory.
///
/// Entries are kept as raw JSON so one bad entry cannot fail the whole roster.
#[derive(Debug, Deserialize)]
struct CharacterList {
    characters: Vec<Value>,
}

/// HTTP client for the character directory.
///
/// `GET {base_url}/v1/characters?game={game_tag}&owner={owner_id}`
pub struct HttpDirectory {
    http_client: Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("retinue/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to build directory HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CharacterDirectory for HttpDirectory {
    async fn fetch_characters(
        &self,
        owner: &Owner,
        game_tag: &str,
    ) -> Result<Vec<CharacterDescriptor>, DirectoryError> {
        let url = format!("{}/v1/characters", self.base_url);
        let owner_id = owner.id.to_string();

        let response = self
            .http_client
            .get(&url)
            .query(&[("game", game_tag), ("owner", owner_id.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DirectoryError::Timeout
                } else {
                    DirectoryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status(status.as_u16()));
        }

        let list = response
            .json::<CharacterList>()
            .await
            .map_err(|e| DirectoryError::Malformed(e.to_string()))?;

        let total = list.characters.len();
        let characters: Vec<CharacterDescriptor> = list
            .characters
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    warn!(owner = %owner, error = %e, "Skipping malformed roster entry");
                    None
                }
            })
            .collect();

        debug!(owner = %owner, total = total, accepted = characters.len(), "Directory roster received");
        Ok(characters)
    }
}
