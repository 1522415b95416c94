mod support;

mod topology_tests;
