//! Contract tests for the library types

mod support;
mod test_dictionary;
mod test_string;
