mod tests_scheduling;
