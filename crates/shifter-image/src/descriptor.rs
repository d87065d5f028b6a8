use crate::error::{ImageError, Result};

/// The kind of identifier a user passed to `setupRoot`, before gateway
/// resolution collapses `Docker`/`Custom` down to `Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Docker,
    Custom,
    Id,
    Local,
    Scratch,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Docker => "docker",
            ImageType::Custom => "custom",
            ImageType::Id => "id",
            ImageType::Local => "local",
            ImageType::Scratch => "scratch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "docker" => Some(ImageType::Docker),
            "custom" => Some(ImageType::Custom),
            "id" => Some(ImageType::Id),
            "local" => Some(ImageType::Local),
            "scratch" => Some(ImageType::Scratch),
            _ => None,
        }
    }
}

/// `(type, identifier)` as supplied by the caller, before the manifest is
/// loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub image_type: ImageType,
    pub identifier: String,
}

impl ImageDescriptor {
    pub fn new(image_type: ImageType, identifier: impl Into<String>) -> Self {
        ImageDescriptor {
            image_type,
            identifier: identifier.into(),
        }
    }
}

/// Boundary to the out-of-scope remote image gateway. `setupRoot` calls
/// `resolve` whenever a descriptor's type is `Docker` or `Custom`; the
/// wire protocol to an actual gateway is not this crate's concern.
pub trait GatewayClient {
    fn resolve(&self, descriptor: &ImageDescriptor) -> Result<ImageDescriptor>;
}

/// A `GatewayClient` that always fails. The correct default for a build
/// with no gateway wired in: callers still get a concrete, testable
/// `AclDenied`-adjacent error path instead of a panic or a silent no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGatewayClient;

impl GatewayClient for NullGatewayClient {
    fn resolve(&self, descriptor: &ImageDescriptor) -> Result<ImageDescriptor> {
        Err(ImageError::GatewayUnavailable {
            descriptor: descriptor.identifier.clone(),
        })
    }
}

/// Resolves `descriptor` into one with `type = Id` (or `Local`/`Scratch`,
/// which pass through unchanged). `Local` is only accepted when the site
/// allows it.
pub fn resolve(
    descriptor: &ImageDescriptor,
    gateway: &dyn GatewayClient,
    allow_local_chroot: bool,
) -> Result<ImageDescriptor> {
    match descriptor.image_type {
        ImageType::Docker | ImageType::Custom => gateway.resolve(descriptor),
        ImageType::Local if !allow_local_chroot => Err(ImageError::LocalChrootDisallowed),
        ImageType::Local | ImageType::Id | ImageType::Scratch => Ok(descriptor.clone()),
    }
}
