//! Built-in trigger sets.

/// The Gilded Araya (Asura).
pub mod gilded_araya;
