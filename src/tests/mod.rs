//! Integration tests across the editor, the engine and the direction controller.
//!
//! These run whole editing sessions against an in-memory store whose saves can
//! be made to fail or to hang, so failure handling and queueing are exercised
//! end to end.

mod support;
mod workbench_tests;
