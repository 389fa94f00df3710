mod test_concurrent_read;
mod test_rotation;
mod test_truncate;
