//! Sans-IO RAOP wire protocols

pub mod crypto;
pub mod raop;
pub mod rtp;
pub mod rtsp;
pub mod sdp;
