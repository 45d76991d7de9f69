//! Statsboard - live statistics dashboard backend
//!
//! Polls install counts, subscriptions, the waitlist and spin-wheel leads,
//! keeps admin-editable revenue in a JSON document, and serves it all as:
//! - A JSON API for the dashboard and admin pages
//! - A Server-Sent Events stream of aggregated snapshots
//! - A cron endpoint that scrapes the Play Store install count

pub mod config;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod fetchers;
pub mod parse;
pub mod playstore;
pub mod store;
pub mod web;

#[cfg(test)]
mod testutil;
