mod test_coroutine;
mod test_lexer;
mod test_scenarios;
mod test_stdlib;
mod test_table;
mod test_vm;
