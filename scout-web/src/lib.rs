//! Store discovery and contact extraction.
//!
//! - [`search`]: search-engine queries, result-page parsing, seed lists and
//!   the [`search::CandidateSource`] the pipeline pulls from
//! - [`page`]: [`page::ParsedPage`], typed queries over one HTML document
//! - [`extract`]: the layered [`extract::ContactExtractor`]
//! - [`visit`]: [`visit::StoreVisitor`], one store visit including the
//!   contact-page follow-up
//!
//! HTML documents are parsed and dropped inside synchronous functions; only
//! owned results cross an `.await`.

pub mod extract;
pub mod page;
pub mod search;
pub mod visit;
