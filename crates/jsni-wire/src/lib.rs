//! JSNI Wire Format
//!
//! This crate defines the byte-exact encoding shared by a WebAssembly module
//! and its host when the module calls host functions by name:
//!
//! - [`ValueKind`]: the closed set of value kinds and their tags
//! - [`FatPtr`]: a 32-bit offset and a 32-bit length packed into one `u64`
//! - [`Slot`]: the fixed 16-byte record holding one tagged value
//! - [`JsniValue`]: the native, explicitly tagged value
//! - [`guest`]: the module's side of a call, building the argument frame and
//!   reading results back by handle
//!
//! # Slot Layout
//!
//! ```text
//! bytes 0..8   payload (scalar, or u32 offset + u32 length)
//! byte  8      kind tag
//! bytes 9..16  reserved
//! ```
//!
//! An array of N slots occupies exactly `16 * N` bytes.
//!
//! # Example
//!
//! ```
//! use jsni_wire::{JsniValue, Slot, ValueKind};
//!
//! let slot = JsniValue::I32(-7).to_scalar_slot().unwrap();
//! assert_eq!(slot.kind().unwrap(), ValueKind::I32);
//!
//! let decoded = JsniValue::from_scalar_slot(&Slot::from_bytes(&slot.to_bytes())).unwrap();
//! assert_eq!(decoded, JsniValue::I32(-7));
//! ```

pub mod dynamic;
pub mod error;
pub mod fat_ptr;
pub mod guest;
pub mod kind;
pub mod slot;
pub mod value;

pub use error::{WireError, WireResult};
pub use fat_ptr::FatPtr;
pub use guest::{CallFrame, SlotAllocations};
pub use kind::ValueKind;
pub use slot::{PAYLOAD_SIZE, SLOT_SIZE, Slot, TAG_OFFSET, slot_address};
pub use value::JsniValue;
