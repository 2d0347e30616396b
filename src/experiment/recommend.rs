//! Typed post-configuration recommendation surface
//!
//! Variant payloads and the promoted defaults are expressed as a patch
//! over an explicit configuration struct. Every recognized key is an
//! enum, so an unknown value is rejected when the configuration is
//! loaded, not discovered mid-run.

use serde::{Deserialize, Serialize};

/// Where a post is published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostFormat {
    /// Regular feed post
    #[default]
    Feed,
    /// Ephemeral story
    Story,
}

/// How many hashtags the caption carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HashtagStrategy {
    /// No hashtags
    None,
    /// Source tag only
    #[default]
    Minimal,
    /// Source tag plus the configured account tag set
    Full,
}

/// Visual treatment requested from the image collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImageStyle {
    #[default]
    Plain,
    Gradient,
    Photo,
}

/// Effective configuration for one post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PostConfig {
    /// Target surface for the post
    pub format: PostFormat,
    /// Hashtag strategy for the caption
    pub hashtag_strategy: HashtagStrategy,
    /// Image style hint
    pub image_style: ImageStyle,
}

impl PostConfig {
    /// Apply a variant patch on top of this configuration
    pub fn apply(&mut self, patch: &PostConfigPatch) {
        if let Some(format) = patch.force_format {
            self.format = format;
        }
        if let Some(strategy) = patch.hashtag_strategy {
            self.hashtag_strategy = strategy;
        }
        if let Some(style) = patch.image_style {
            self.image_style = style;
        }
    }

    /// This configuration with a patch applied
    pub fn with_patch(mut self, patch: &PostConfigPatch) -> Self {
        self.apply(patch);
        self
    }
}

/// Partial configuration carried by an experiment variant
///
/// Unset fields leave the underlying configuration untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PostConfigPatch {
    /// Force the post format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_format: Option<PostFormat>,

    /// Override the hashtag strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtag_strategy: Option<HashtagStrategy>,

    /// Override the image style
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_style: Option<ImageStyle>,
}

impl PostConfigPatch {
    /// True when the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.force_format.is_none()
            && self.hashtag_strategy.is_none()
            && self.image_style.is_none()
    }
}
