use crate::execute_capturing;

#[test]
fn table_insert_remove_and_length() {
    let (out, result) = execute_capturing(
        r#"
        local t = {1, 2, 3}
        table.insert(t, 4)
        table.insert(t, 1, 0)
        print(#t, t[1], t[5])
        table.remove(t, 1)
        print(#t, t[1])
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "5\t0\t4\n4\t1\n");
}

#[test]
fn table_concat_with_separator_and_range() {
    let (out, result) = execute_capturing(
        r#"
        local t = {"a", "b", "c", "d"}
        print(table.concat(t, ", "))
        print(table.concat(t, "-", 2, 3))
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "a, b, c, d\nb-c\n");
}

#[test]
fn table_sort_default_and_with_comparator() {
    let (out, result) = execute_capturing(
        r#"
        local t = {3, 1, 4, 1, 5, 9, 2, 6}
        table.sort(t)
        print(table.concat(t, ","))
        table.sort(t, function(a, b) return a > b end)
        print(table.concat(t, ","))
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "1,1,2,3,4,5,6,9\n9,6,5,4,3,2,1,1\n");
}

#[test]
fn array_and_hash_parts_coexist() {
    let (out, result) = execute_capturing(
        r#"
        local t = {10, 20, 30, name = "lua", [100] = "far"}
        print(#t, t.name, t[100])
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "3\tlua\tfar\n");
}

#[test]
fn ipairs_stops_at_first_nil_hole() {
    let (out, result) = execute_capturing(
        r#"
        local t = {1, 2, nil, 4}
        local count = 0
        for _ in ipairs(t) do count = count + 1 end
        print(count)
        "#,
    );
    assert!(result.is_ok());
    assert_eq!(out, "2\n");
}
