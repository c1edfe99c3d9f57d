//! End-to-end tests on a synthetic media backend


mod audio_access;
mod indexing;
mod persistence;
