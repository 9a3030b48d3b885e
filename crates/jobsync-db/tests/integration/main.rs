mod run_store_tests;
