//! Service layer: external integrations and the pure engines behind the routes.
//!
//! Redis caching, the vision model client, PDF rasterising and writing, email,
//! local file storage, CSV import, catalog matching, estimating and quote scoring.

pub mod ai_client;
pub mod cache;
pub mod csv_import;
pub mod discrepancy;
pub mod estimator;
pub mod mailer;
pub mod matcher;
pub mod pdf_pages;
pub mod plan_parser;
pub mod quote_pdf;
pub mod quote_scoring;
pub mod similarity;
pub mod storage;

pub use ai_client::AiClient;
pub use cache::RedisCache;
pub use mailer::Mailer;
pub use pdf_pages::PdfRasterizer;
pub use plan_parser::PlanParser;
pub use storage::FileStorage;
