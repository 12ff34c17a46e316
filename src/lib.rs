//! # selectk
//!
//! Covariance-structured k-means with penalized-likelihood model selection.
//!
//! Fits a hard partition of N points into k clusters, modeling each cluster
//! as a multivariate Gaussian with a configurable covariance structure
//! (full / diagonal / spherical / global, optionally tied across clusters),
//! and scores every fitted model with AIC and BIC so the best number of
//! clusters and covariance family can be selected across independent fits.
//!
//! The engine is synchronous and CPU-bound: a pure function of (data,
//! configuration, seed). Orchestration concerns — job queues, persistence,
//! plotting — belong to the caller.

pub mod cluster;
/// Error types used across `selectk`.
pub mod error;
pub mod metrics;

pub use cluster::{Clustering, CovKmeans, CovarFamily, FitResult, Metric, MinMembers, RestartRecord};
pub use error::{Error, Result};
pub use metrics::{ari, nmi, purity};
