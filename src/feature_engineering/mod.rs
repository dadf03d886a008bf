//! Feature engineering for KOI tables

pub mod koi_features;

pub use koi_features::{create_advanced_features, stellar_class, KoiFeatureEngineer};
