mod test_conn;
mod test_numbers;
