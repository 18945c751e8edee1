//! Credential lifecycle and request orchestration for the Spotify Web API.
//!
//! tonearm lets an application search the catalog and control playback in
//! two modes:
//! * **guest**: anonymous catalog search with a shared service credential
//! * **premium**: library access and transport control with the user's own
//!   credentials
//!
//! For every outbound call it decides which credential to use, refreshes
//! expired user credentials once (even when many requests need them at the
//! same time), hands refreshed credentials back for persistence, and keeps a
//! polled playback view up to date.
//!
//! # Modules
//!
//! * [`client`] - the [`Tonearm`](client::Tonearm) facade
//! * [`authority`] - resolution and refresh of user credentials
//! * [`service`] - cached service credential for guest mode
//! * [`gateway`] - authenticated Web API calls and error normalization
//! * [`sync`] - playback polling per session
//! * [`session`] - persistence of session credentials
//! * [`oauth`] - token endpoint client
//! * [`protocol`] - Web API wire types
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod authority;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod http;
pub mod oauth;
pub mod playback;
pub mod protocol;
pub mod service;
pub mod session;
pub mod sync;
