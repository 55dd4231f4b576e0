use std::fmt;

/// Kinds of application resource the gateway can route to.
///
/// ```
/// use membrane_resources::ResourceCategory;
///
/// let category = ResourceCategory::from_provider_id("arn:aws:sns:us-east-1:123456789012:orders");
/// assert_eq!(category, ResourceCategory::Topic);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceCategory {
    Api,
    Topic,
    Queue,
    Bucket,
    Secret,
    ScheduleEngine,
    EventRule,
    Unknown,
}

impl ResourceCategory {
    /// Every category callers can look up. `Unknown` is never exposed.
    pub const KNOWN: [ResourceCategory; 7] = [
        ResourceCategory::Api,
        ResourceCategory::Topic,
        ResourceCategory::Queue,
        ResourceCategory::Bucket,
        ResourceCategory::Secret,
        ResourceCategory::ScheduleEngine,
        ResourceCategory::EventRule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::Api => "api",
            ResourceCategory::Topic => "topic",
            ResourceCategory::Queue => "queue",
            ResourceCategory::Bucket => "bucket",
            ResourceCategory::Secret => "secret",
            ResourceCategory::ScheduleEngine => "schedule-engine",
            ResourceCategory::EventRule => "event-rule",
            ResourceCategory::Unknown => "unknown",
        }
    }

    /// Maps the service segment of a provider identifier to a category.
    pub fn from_service(service: &str) -> Self {
        match service {
            "apigateway" => ResourceCategory::Api,
            "sns" => ResourceCategory::Topic,
            "sqs" => ResourceCategory::Queue,
            "s3" => ResourceCategory::Bucket,
            "secretsmanager" => ResourceCategory::Secret,
            "scheduler" => ResourceCategory::ScheduleEngine,
            "events" => ResourceCategory::EventRule,
            _ => ResourceCategory::Unknown,
        }
    }

    pub fn from_provider_id(provider_id: &str) -> Self {
        ProviderId::parse(provider_id)
            .map(|id| Self::from_service(id.service))
            .unwrap_or(ResourceCategory::Unknown)
    }

    /// Resource-type filter sent to the tagging inventory for this category.
    pub fn inventory_filter(&self) -> Option<&'static str> {
        match self {
            ResourceCategory::Api => Some("apigateway:apis"),
            ResourceCategory::Topic => Some("sns:topic"),
            ResourceCategory::Queue => Some("sqs:queue"),
            ResourceCategory::Bucket => Some("s3:bucket"),
            ResourceCategory::Secret => Some("secretsmanager:secret"),
            ResourceCategory::ScheduleEngine => Some("scheduler:schedule-group"),
            ResourceCategory::EventRule => Some("events:rule"),
            ResourceCategory::Unknown => None,
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `arn:<partition>:<service>:<region>:<account>:<resource>` identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderId<'a> {
    pub partition: &'a str,
    pub service: &'a str,
    pub region: &'a str,
    pub account: &'a str,
    pub resource: &'a str,
}

impl<'a> ProviderId<'a> {
    pub fn parse(raw: &'a str) -> Option<Self> {
        let mut parts = raw.splitn(6, ':');
        if parts.next()? != "arn" {
            return None;
        }
        let partition = parts.next()?;
        let service = parts.next()?;
        let region = parts.next()?;
        let account = parts.next()?;
        let resource = parts.next()?;
        if service.is_empty() {
            return None;
        }
        Some(Self {
            partition,
            service,
            region,
            account,
            resource,
        })
    }

    /// Last `/`-separated segment of the resource part (the API id for gateway APIs).
    pub fn resource_tail(&self) -> &'a str {
        self.resource.rsplit('/').next().unwrap_or(self.resource)
    }
}
