use crate::error::RecordError;
use serde::Deserialize;

/// Lifecycle event that starts recording when the document is still loading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAfter {
    DomContentLoaded,
    Load,
}

/// Recording options. Every field has a default, so a partial TOML table is enough.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordOptions {
    /// Take a checkout full snapshot after this many incremental events.
    pub checkout_every_nth: Option<u32>,
    /// Take a checkout full snapshot once this many milliseconds passed since the
    /// last one (checked when an incremental event is emitted).
    pub checkout_every_nms: Option<u64>,
    /// Child frames relay to a cross-origin parent, and the parent accepts them.
    pub record_cross_origin_iframes: bool,
    pub record_canvas: bool,
    /// When off, no full snapshots are taken and the tree is not observed.
    pub record_dom: bool,
    pub record_after: RecordAfter,
    /// How many flushes an add may wait for its parent or next sibling before it is
    /// dropped and a resynchronising snapshot is taken.
    pub max_deferred_flushes: u32,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            checkout_every_nth: None,
            checkout_every_nms: None,
            record_cross_origin_iframes: false,
            record_canvas: false,
            record_dom: true,
            record_after: RecordAfter::Load,
            max_deferred_flushes: 3,
        }
    }
}

impl RecordOptions {
    pub fn from_toml_str(source: &str) -> Result<Self, RecordError> {
        let options: RecordOptions =
            toml::from_str(source).map_err(|err| RecordError::InvalidConfig(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        if self.checkout_every_nth == Some(0) {
            return Err(RecordError::InvalidConfig(
                "checkout_every_nth must be at least 1".to_string(),
            ));
        }
        if self.checkout_every_nms == Some(0) {
            return Err(RecordError::InvalidConfig(
                "checkout_every_nms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
