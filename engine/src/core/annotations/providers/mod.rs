//! Annotation Services
//!
//! - **google_cloud.rs**: Google Cloud Video Intelligence REST API

pub mod google_cloud;

pub use google_cloud::GoogleCloudVideoService;
