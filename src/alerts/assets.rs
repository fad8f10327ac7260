use std::{collections::HashMap, time::Duration};

use log::error;
use serde::{Deserialize, Serialize};

/// A sound an alert can play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub url: String,
}

impl Asset {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Asset {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Custom sounds of an alert and the order to play them in.
///
/// An empty configuration means the alert plays its default sound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetConfiguration {
    /// Assets by id.
    pub assets: HashMap<String, Asset>,
    /// Asset ids in play order. Ids may repeat.
    pub play_order: Vec<String>,
    /// Asset played while the alert is in the background.
    pub background_asset_id: Option<String>,
    /// Pause between two loops of the play order.
    pub loop_pause: Duration,
}

impl AssetConfiguration {
    /// Checks that every id referenced by the play order and the background
    /// asset is present in `assets`.
    ///
    /// # Examples
    ///
    /// ```
    /// use alert_scheduler::alerts::{Asset, AssetConfiguration};
    ///
    /// let mut config = AssetConfiguration::default();
    /// config.play_order.push("chime".to_string());
    /// assert!(!config.is_valid());
    ///
    /// config.assets.insert("chime".to_string(), Asset::new("chime", "file:///chime.mp3"));
    /// assert!(config.is_valid());
    /// ```
    pub fn is_valid(&self) -> bool {
        if let Some(id) = self.play_order.iter().find(|id| !self.assets.contains_key(*id)) {
            error!("asset {} of the play order is not defined", id);
            return false;
        }
        match &self.background_asset_id {
            Some(id) if !self.assets.contains_key(id) => {
                error!("background asset {} is not defined", id);
                false
            }
            _ => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Urls of the play order.
    pub fn play_order_urls(&self) -> Vec<String> {
        self.play_order
            .iter()
            .filter_map(|id| self.assets.get(id))
            .map(|asset| asset.url.clone())
            .collect()
    }

    /// Url of the background asset, if any.
    pub fn background_url(&self) -> Option<&str> {
        self.background_asset_id
            .as_ref()
            .and_then(|id| self.assets.get(id))
            .map(|asset| asset.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AssetConfiguration {
        let mut assets = HashMap::new();
        assets.insert("a".to_string(), Asset::new("a", "file:///a.mp3"));
        assets.insert("b".to_string(), Asset::new("b", "file:///b.mp3"));
        AssetConfiguration {
            assets,
            play_order: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            background_asset_id: Some("b".to_string()),
            loop_pause: Duration::from_millis(700),
        }
    }

    #[test]
    fn test_play_order_urls_keep_repetitions() {
        assert_eq!(
            config().play_order_urls(),
            vec!["file:///a.mp3", "file:///b.mp3", "file:///a.mp3"]
        );
    }

    #[test]
    fn test_background_url() {
        assert_eq!(config().background_url(), Some("file:///b.mp3"));
        assert_eq!(AssetConfiguration::default().background_url(), None);
    }

    #[test]
    fn test_invalid_background_asset() {
        let mut config = config();
        config.background_asset_id = Some("missing".to_string());
        assert!(!config.is_valid());
    }

    #[test]
    fn test_default_is_valid_and_empty() {
        let config = AssetConfiguration::default();
        assert!(config.is_valid());
        assert!(config.is_empty());
    }
}
