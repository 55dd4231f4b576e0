const TAG_PREFIX: &str = "x-membrane";

/// Tag keys that mark a provider resource as part of this deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryTag {
    stack_id: Option<String>,
}

impl DiscoveryTag {
    pub fn new(stack_id: Option<String>) -> Self {
        Self {
            stack_id: stack_id.filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn stack_id(&self) -> Option<&str> {
        self.stack_id.as_deref()
    }

    /// Key whose value is the resource's logical name.
    pub fn name_key(&self) -> String {
        self.key("name")
    }

    /// Key whose value describes the resource flavour (e.g. `http-proxy`).
    pub fn type_key(&self) -> String {
        self.key("type")
    }

    fn key(&self, suffix: &str) -> String {
        match &self.stack_id {
            Some(stack) => format!("{TAG_PREFIX}-{stack}-{suffix}"),
            None => format!("{TAG_PREFIX}-{suffix}"),
        }
    }
}
