use crate::execute_capturing;

#[test]
fn string_library_basics() {
    let (out, result) = execute_capturing(
        r#"
        print(string.upper("hello"), string.lower("WORLD"))
        print(string.len("hello"), #"hello")
        print(string.sub("hello world", 1, 5))
        print(string.sub("hello world", -5))
        print(string.rep("ab", 3))
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "HELLO\tworld\n5\t5\nhello\nworld\nababab\n");
}

#[test]
fn string_format_basic_specs() {
    let (out, result) = execute_capturing(r#"print(string.format("%d-%s-%.2f", 5, "x", 3.14159))"#);
    assert!(result.is_ok());
    assert_eq!(out, "5-x-3.14\n");
}

#[test]
fn string_find_and_match_with_patterns() {
    let (out, result) = execute_capturing(
        r#"
        print(string.find("hello world", "wor"))
        print(string.match("hello123world", "%d+"))
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "7\t9\n123\n");
}

#[test]
fn string_gmatch_iterates_all_matches() {
    let (out, result) = execute_capturing(
        r#"
        local words = {}
        for w in string.gmatch("one two three", "%a+") do
          words[#words + 1] = w
        end
        print(table.concat(words, ","))
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "one,two,three\n");
}

#[test]
fn string_gsub_counts_and_replaces() {
    let (out, result) = execute_capturing(r#"print(string.gsub("hello world", "o", "0"))"#);
    assert!(result.is_ok());
    assert_eq!(out, "hell0 w0rld\t2\n");
}

#[test]
fn string_method_call_sugar_on_literals() {
    let (out, result) = execute_capturing(r#"print(("  trim me  "):gsub("^%s+", ""))"#);
    assert!(result.is_ok());
    assert_eq!(out, "trim me  \t1\n");
}

#[test]
fn math_library_basics() {
    let (out, result) = execute_capturing(
        r#"
        print(math.floor(3.7), math.ceil(3.2), math.abs(-5))
        print(math.max(1, 5, 3), math.min(1, 5, 3))
        print(math.sqrt(16))
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "3\t4\t5\n5\t1\n4\n");
}

#[test]
fn math_constants_are_registered() {
    let (out, result) = execute_capturing(r#"print(math.pi > 3.14 and math.pi < 3.15, math.huge > 1e300)"#);
    assert!(result.is_ok());
    assert_eq!(out, "true\ttrue\n");
}

#[test]
fn math_random_respects_bounds() {
    let (_out, result) = execute_capturing(
        r#"
        for _ = 1, 50 do
          local n = math.random(1, 10)
          assert(n >= 1 and n <= 10)
        end
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn os_time_and_difftime_are_consistent() {
    let (out, result) = execute_capturing(
        r#"
        local t1 = os.time()
        local t2 = os.time()
        print(os.difftime(t2, t1) >= 0)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "true\n");
}

#[test]
fn os_date_table_form_has_expected_fields() {
    let (out, result) = execute_capturing(
        r#"
        local d = os.date("!*t", 0)
        print(d.year, d.month, d.day)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "1970\t1\t1\n");
}
