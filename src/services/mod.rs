pub mod iam;
pub mod upstream;

pub use iam::{AccessGrantRequest, CustomRequest, IamService, PermissionGrantRequest, PermissionTarget, VerifyRequest, VerifyResponse};
pub use upstream::{HttpUpstreamClient, UpstreamClient, UpstreamError};
