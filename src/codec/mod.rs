//! Composable stream filters.
//!
//! Every filter implements the [`Stream`](crate::stream::Stream)
//! contract, so encoders stack onto any sink and decoders onto any
//! source without copying: a ZIP entry is a substream fed through
//! [`InflateStream`] and a CRC-verifying
//! [`HashStream`](crate::stream::HashStream); a gzip member is a
//! [`DeflateStream`] bracketed by header and footer; an HTTP body is a
//! [`ChunkedWriter`] over the transport.

pub mod base64;
pub mod chunked;
pub mod deflate;
pub mod gzip;
pub mod quoted_printable;

pub use base64::{Base64Decoder, Base64Encoder, Base64Options};
pub use chunked::{ChunkedReader, ChunkedWriter};
pub use deflate::{DeflateStream, InflateStream};
pub use gzip::{GzipFooter, GzipHeader, GzipOptions, GzipReader, GzipWriter};
pub use quoted_printable::{
    QuotedPrintableDecoder, QuotedPrintableEncoder, QuotedPrintableOptions, TextMode,
};
