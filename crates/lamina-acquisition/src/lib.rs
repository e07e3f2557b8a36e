//! lamina-acquisition — the literature acquisition pipeline.
//!
//! A job flows search → download → extract → translate:
//!   1. Query each selected source adapter (PubMed, arXiv, Semantic Scholar)
//!   2. Deduplicate by identifier precedence, then normalized title
//!   3. Fetch open-access PDFs with retry/backoff
//!   4. Extract plain text and canonical sections from each PDF
//!   5. Translate configured fields with chunking and rate discipline
//!   6. Persist every artifact under `<storage_root>/<job_id>/`
//!   7. Emit progress events at every stage boundary
//!
//! The orchestrator honors pause/cancel between pages and between per-paper
//! work items, and resumes interrupted jobs from the on-disk layout alone.

pub mod dedup;
pub mod download;
pub mod extract;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod sources;
pub mod storage;
pub mod translate;
