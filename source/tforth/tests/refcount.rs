//! Objects are freed as soon as the last value referring to them goes
//! away, whichever stack, word body or pointer chain held it.

use tforth::{
    testutil::alloc::{live, CountingAlloc},
    Forth, Params,
};

#[global_allocator]
static ALLOC: CountingAlloc = CountingAlloc::new();

fn vm() -> Forth<()> {
    Forth::new(Params::default(), (), Forth::FULL_BUILTINS).unwrap()
}

fn run(forth: &mut Forth<()>, line: &str) -> bool {
    forth.output.clear();
    forth.input.fill(line).unwrap();
    let ok = forth.process_line().is_ok();
    forth.output.clear();
    ok
}

/// Run `lines` once to warm up any buffers they grow, then check that more
/// runs leave no allocations behind.
fn assert_steady(forth: &mut Forth<()>, lines: &[&str]) {
    for line in lines {
        run(forth, line);
    }
    let before = live();
    for _ in 0..16 {
        for line in lines {
            run(forth, line);
        }
    }
    assert_eq!(live(), before, "leaked while running {lines:?}");
}

#[test]
fn stack_temporaries() {
    let mut forth = vm();
    assert_steady(
        &mut forth,
        &[
            r#"s" hello" dup drop >t t> >self self> drop"#,
            "3 array new dup size drop drop",
            r#"s" a" s" b" + drop"#,
        ],
    );
    assert_eq!(forth.data_stack.depth(), 0);
}

#[test]
fn overwritten_variables() {
    let mut forth = vm();
    run(&mut forth, "variable v variable vp v vp !");
    assert_steady(
        &mut forth,
        &[r#"s" payload" v !"#, r#"s" again" vp @ !"#, "5 array new v !"],
    );
}

#[test]
fn nested_objects() {
    let mut forth = vm();
    run(&mut forth, "struct: box item ;struct variable keep");
    assert_steady(
        &mut forth,
        &[
            "box new keep !",
            r#"s" inner" box.item keep @ set"#,
            "1 array new box.item keep @ set",
        ],
    );
}

#[test]
fn redefined_and_forgotten_words() {
    let mut forth = vm();
    assert_steady(
        &mut forth,
        &[
            r#": scratch s" text" 3 array new 2drop ;"#,
            "scratch",
            ": user scratch ;",
            "forget scratch",
            "user",
            "forget user",
        ],
    );
}

#[test]
fn failed_lines() {
    let mut forth = vm();
    assert_steady(
        &mut forth,
        &[
            r#"s" left" 4 array new 1 0 /"#,
            r#": half-done s" x" if"#,
            "no-such-word",
        ],
    );
    assert_eq!(forth.data_stack.depth(), 0);
}

#[test]
fn cycles_are_not_reclaimed() {
    let mut forth = vm();
    // Breaking the cycle before the last reference goes frees the array.
    assert_steady(
        &mut forth,
        &["1 array new dup dup 0 swap set 0 0 rot set"],
    );

    // An array holding itself keeps itself alive.
    let before = live();
    for _ in 0..4 {
        run(&mut forth, "1 array new dup dup 0 swap set drop");
    }
    assert!(live() >= before + 4, "self-containing arrays were freed");
    assert_eq!(forth.data_stack.depth(), 0);
}
