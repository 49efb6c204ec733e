mod driver_test;
mod reconciliation_test;
