//! Utility functions and types

pub mod data_loader;

pub use data_loader::{
    detect_separator, log_dataset_summary, missing_required_columns, to_records, DataLoader, DataSaver,
    REQUIRED_COLUMNS,
};
