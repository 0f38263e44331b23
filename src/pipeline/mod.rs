//! Pipeline stages for document OCR extraction.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the engines can be swapped behind their traits.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ load ──▶ orchestrator ─┬─▶ render ──▶ recognize ──▶ postprocess
//! (path/URL) (sniff)  (K workers)  └── per page ─────────────────────────┘
//!                          │
//!                          ▼
//!                      assemble
//! ```
//!
//! 1. [`input`]  — read a local file or download a URL into memory
//! 2. [`load`]   — sniff PDF vs image, count pages, build the `Document`
//! 3. [`orchestrator`] — schedule pages across workers under timeouts,
//!    the job deadline and cancellation
//! 4. [`render`] — one page → PNG (`pdftoppm`, or in-process for images)
//! 5. [`recognize`] — PNG → text + confidence (`tesseract`)
//! 6. [`postprocess`] — deterministic text cleanup
//! 7. [`assemble`] — page-ordered `DocumentResult`
//!
//! [`process`] and [`encode`] are shared helpers: child-process handling
//! with kill-on-drop, and PNG normalisation of image inputs.

pub mod assemble;
pub mod encode;
pub mod input;
pub mod load;
pub mod orchestrator;
pub mod postprocess;
pub mod process;
pub mod recognize;
pub mod render;
