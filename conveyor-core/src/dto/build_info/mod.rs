//! Build information written next to the rendered manifests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::context::{BuildContext, CiPlatform};

/// Contents of `build-info.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub app_name: String,
    pub version: String,
    pub ci_environment: CiPlatform,
    pub build_time: DateTime<Utc>,
    pub branch: String,
    pub image_tag: String,
    pub build_number: u64,
}

impl From<&BuildContext> for BuildInfo {
    fn from(ctx: &BuildContext) -> Self {
        Self {
            app_name: ctx.app_name().to_string(),
            version: ctx.revision().to_string(),
            ci_environment: ctx.platform(),
            build_time: Utc::now(),
            branch: ctx.branch().to_string(),
            image_tag: ctx.image_reference(),
            build_number: ctx.build_number(),
        }
    }
}
