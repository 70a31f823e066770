// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log buffer framing substrate.
//!
//! The wire-format-identical shared memory layer binding producers, the
//! sender, the receiver, and subscribers:
//!
//! ```text
//! Producer --append/claim--> TermAppender --raw tail fetch-add--> Term
//!       v commit (release-store frame_length)
//! TermScanner --contiguous committed bytes--> Sender datagram
//! TermRebuilder <--datagrams-- Receiver        (image side)
//! GapScanner --first missing run--> NAK
//! ```

/// Zero-copy claim over a term region.
pub mod buffer_claim;
/// Log layout, raw tails, position arithmetic.
pub mod descriptor;
/// Frame header layout and accessors.
pub mod frame;
/// Reception gap scanning for NAKs.
pub mod gap_scanner;
/// Default header writer.
pub mod header_writer;
/// Mapped log files and the log factory.
pub mod raw_log;
/// Producer-side framing engine.
pub mod term_appender;
/// Consumer-side fragment reader.
pub mod term_reader;
/// Receiver-side packet insertion.
pub mod term_rebuilder;
/// Sender-side committed-frame scanner.
pub mod term_scanner;
/// Stalled-claim unblocking.
pub mod unblocker;

pub use buffer_claim::BufferClaim;
pub use header_writer::HeaderWriter;
pub use raw_log::{LogFactory, RawLog};
pub use term_appender::TermAppender;
