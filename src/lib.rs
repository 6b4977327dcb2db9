//! Lane Traffic Simulation Library
//!
//! A deterministic traffic engine for lane-structured grid road networks that
//! can run headless or behind any external renderer.

pub mod simulation;
