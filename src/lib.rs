//! Typed host-side messaging for a memory-constrained wearable peripheral.
//!
//! Wearlink multiplexes a closed catalog of typed messages and a lua control
//! channel over one MTU-limited packet stream, handling fragmentation,
//! reassembly and flow control so applications work with whole photos, audio
//! windows, motion updates and gestures instead of radio packets.
//!
//! # Architecture
//!
//! - **Link**: owns the connection; fragments outbound messages to the
//!   negotiated MTU and routes inbound packets to the control or data
//!   sub-channel.
//! - **Dispatch**: demultiplexes inbound typed traffic by discriminator byte.
//! - **Receivers**: per-family reassembly (`RxPhoto`, `RxAudio`, `RxImu`,
//!   `RxTap`) delivering completed units through bounded queues.
//! - **Loader**: uploads lua app sources to the peripheral and drives app
//!   lifecycle.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use wearlink::{Link, Radio, TxCaptureSettings, WireMessage, codes, rx::RxPhoto};
//!
//! async fn capture(radio: impl Radio) -> Result<(), Box<dyn std::error::Error>> {
//!     let link = Link::connect(radio).await?;
//!
//!     let photos = RxPhoto::new();
//!     let mut queue = photos.attach(&link)?;
//!
//!     let settings = TxCaptureSettings::new(512, 4)?;
//!     link.send_message(codes::CAPTURE_SETTINGS, &settings.pack()).await?;
//!
//!     let jpeg = queue.recv().await.ok_or("link closed")?;
//!     println!("captured {} bytes", jpeg.len());
//!     Ok(())
//! }
//! ```

// Transport core
pub mod dispatch;
mod driver;
mod error;
pub mod link;
pub mod radio;

// Message catalog and codecs
pub mod messages;
pub mod quantize;

// Higher-level services
pub mod loader;
pub mod rx;

#[cfg(test)]
pub mod test_utils;

// Core exports
pub use dispatch::{Dispatch, Fragment, FragmentSink};
pub use error::{CodecError, DispatchError, LinkError, LoaderError};
pub use link::{BREAK_SIGNAL, DATA_FLAG, DEFAULT_MAX_PAYLOAD, Link, LinkConfig, RESET_SIGNAL};
pub use radio::Radio;

// Catalog exports
pub use messages::{
    BlockCompressor, Direction, GlyphBitmap, GlyphProvider, ImageBlockAssembler,
    MAX_UNSLICED_BYTES, SpriteData, TextRow, TxCaptureSettings, TxCode, TxImageSpriteBlock,
    TxManualExpSettings, TxPlainText, TxSprite, TxTextSpriteBlock, WireMessage, codes,
};
pub use quantize::RawImage;
