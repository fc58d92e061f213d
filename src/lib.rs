//! Backup, restore and maintenance engine for the inventory store

pub mod config;
pub mod database;
pub mod db;
pub mod service;
