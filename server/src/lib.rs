//! Pumphouse server library — remote watering controller backend.
//!
//! Mediates between embedded pump controllers (connected over a persistent
//! WebSocket channel) and browser dashboards: tracks live sessions in the
//! [`ws::hub::SessionHub`], routes manual and scheduled watering commands via
//! [`commands::CommandRouter`], and fires recurring alarms from the periodic
//! engine in [`alarms`].

pub mod alarms;
pub mod api;
pub mod commands;
pub mod config;
pub mod db;
pub mod store;
pub mod ws;
