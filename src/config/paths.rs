//! Filesystem locations derived from the XDG base directories.

pub mod xdg_root;
