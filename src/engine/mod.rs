//! Asset transaction engine
//!
//! Resolver → Builder → Gateway. The resolver normalizes requests and picks
//! funding, the builder produces a color-conserving skeleton, and the gateway
//! signs and broadcasts it.

pub mod builder;
pub mod gateway;
pub mod request;
pub mod resolver;

pub use builder::{
    BuildError, FeeRateConfig, IssuanceSkeleton, SkeletonKind, TransactionBuilder,
    UnsignedSkeleton, COLORED_OUTPUT_VALUE, DUST_LIMIT,
};
pub use gateway::{Gateway, GatewayError};
pub use request::{
    Destination, IssuanceRequest, IssuanceTransfer, NormalizedTransfer, SourceSelection,
    TransferOrder, TransferRequest, TransferTarget, ValidationError,
};
pub use resolver::{IssuancePlan, ResolveError, ResolvedOutput, Resolver, TransferPlan};
