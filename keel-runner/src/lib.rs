//! Keel Runner
//!
//! Everything one build unit needs to turn a matrix entry into published
//! images:
//! - Resolver: locates the build descriptor through ordered layouts
//! - Cache: restores, stages, promotes and prunes local layer cache
//! - Buildx: builds and tags the image with the container CLI
//! - Publisher: logs in, checks tag conflicts and pushes with retry
//! - Unit: runs the steps above in order and reports a `BuildResult`

pub mod buildx;
pub mod cache;
pub mod config;
pub mod process;
pub mod publisher;
pub mod resolver;
pub mod retry;
pub mod unit;

pub use buildx::{BuildRequest, BuildxBuilder, BuiltImage, ImageBuilder};
pub use cache::{CacheKey, LayerCache, StagingCache};
pub use config::Config;
pub use publisher::{CliPusher, ImagePusher, PublishOutcome, Publisher, RegistryPublisher};
pub use resolver::{DescriptorResolver, ResolutionStrategy};
pub use retry::RetryPolicy;
pub use unit::BuildUnit;

pub use keel_client::Credentials;
