//! Scenario tests driving the whole gateway through a mock transport
//! factory. Unit tests for individual pieces live next to the code.

mod support;
