// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Metadata identifying an application reporting telemetry: the mandatory
/// `application` and `service` tags, the optional `cluster` and `shard`
/// tags, and any number of custom tags attached to every heartbeat.
#[derive(Clone, Debug)]
pub struct ApplicationTags {
    application: String,
    service: String,
    cluster: Option<String>,
    shard: Option<String>,
    custom_tags: Vec<(String, String)>,
}

impl ApplicationTags {
    pub fn new(application: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            service: service.into(),
            cluster: None,
            shard: None,
            custom_tags: Vec::new(),
        }
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn with_shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    pub fn add_custom_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_tags.push((key.into(), value.into()));
        self
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn shard(&self) -> Option<&str> {
        self.shard.as_deref()
    }

    pub fn custom_tags(&self) -> &[(String, String)] {
        &self.custom_tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_tags_default_to_none() {
        let tags = ApplicationTags::new("ordering", "checkout");
        assert_eq!(tags.application(), "ordering");
        assert_eq!(tags.service(), "checkout");
        assert!(tags.cluster().is_none());
        assert!(tags.shard().is_none());
        assert!(tags.custom_tags().is_empty());
    }

    #[test]
    fn builder_style_population() {
        let tags = ApplicationTags::new("ordering", "checkout")
            .with_cluster("us-west-2")
            .with_shard("primary")
            .add_custom_tag("team", "payments");
        assert_eq!(tags.cluster(), Some("us-west-2"));
        assert_eq!(tags.shard(), Some("primary"));
        assert_eq!(tags.custom_tags(), [("team".to_owned(), "payments".to_owned())]);
    }
}
