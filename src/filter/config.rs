//! Filter thresholds and the shared handle that serializes their updates.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::FilterError;
use crate::constants::{DEFAULT_AREA_LIMIT, DEFAULT_IOU_LIMIT, DEFAULT_PREDICTED_IOU_LIMIT};

/// Thresholds for the three filter passes.
///
/// Serialized with the keys the presentation layer uses (`minArea`, `maxIOU`,
/// `minConfidence`); the field names are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum mask area as a fraction of the image, in `(0, 1)`
    #[serde(rename = "minArea", alias = "area_limit")]
    pub area_limit: f64,

    /// Overlap above which the smaller mask is suppressed, in `[0, 1]`
    #[serde(rename = "maxIOU", alias = "iou_limit")]
    pub iou_limit: f64,

    /// Minimum model confidence, in `[0, 1]`
    #[serde(rename = "minConfidence", alias = "predicted_iou_limit")]
    pub predicted_iou_limit: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            area_limit: DEFAULT_AREA_LIMIT,
            iou_limit: DEFAULT_IOU_LIMIT,
            predicted_iou_limit: DEFAULT_PREDICTED_IOU_LIMIT,
        }
    }
}

impl FilterConfig {
    pub fn new(area_limit: f64, iou_limit: f64, predicted_iou_limit: f64) -> Self {
        Self {
            area_limit,
            iou_limit,
            predicted_iou_limit,
        }
    }

    /// Check every threshold against its allowed range.
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(self.area_limit > 0.0 && self.area_limit < 1.0) {
            return Err(FilterError::invalid_config("minArea", self.area_limit));
        }
        if !(0.0..=1.0).contains(&self.iou_limit) {
            return Err(FilterError::invalid_config("maxIOU", self.iou_limit));
        }
        if !(0.0..=1.0).contains(&self.predicted_iou_limit) {
            return Err(FilterError::invalid_config(
                "minConfidence",
                self.predicted_iou_limit,
            ));
        }
        Ok(())
    }
}

/// Shared, read-mostly filter configuration for one session.
///
/// An application embedding the crate clones one handle into every thread
/// that filters or changes thresholds; it is the single place where those
/// changes are ordered. The command line keeps its session defaults here.
///
/// Filter calls work on a [`snapshot`](Self::snapshot); [`update`](Self::update)
/// takes the write lock so no snapshot ever sees a half-written configuration.
#[derive(Debug, Clone, Default)]
pub struct FilterHandle {
    inner: Arc<RwLock<FilterConfig>>,
}

impl FilterHandle {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> FilterConfig {
        // FilterConfig is plain data, so a poisoned lock still holds a whole value.
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and install a new configuration.
    pub fn update(&self, config: FilterConfig) -> Result<(), FilterError> {
        config.validate()?;
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        log::info!(
            "Updating filter: minArea={} maxIOU={} minConfidence={}",
            config.area_limit,
            config.iou_limit,
            config.predicted_iou_limit
        );
        *guard = config;
        Ok(())
    }
}
