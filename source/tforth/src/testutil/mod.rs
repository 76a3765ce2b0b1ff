//! # Test Utilities
//!
//! Helpers for running "ui tests": forth code, with the output expected for
//! each line, executed at test time.
//!
//! ## UI Tests
//!
//! Each line of a ui test is one of:
//!
//! * Configuration values for the VM, specified as "frontmatter comments".
//!   These must appear before any other non-comment lines. Currently accepted:
//!     * `( data_stack_elems USIZE )`
//!     * `( return_stack_elems USIZE )`
//!     * `( temp_stack_elems USIZE )`
//!     * `( self_stack_elems USIZE )`
//!     * `( input_buf_elems USIZE )`
//!     * `( output_buf_elems USIZE )`
//! * Comment lines. These are any lines just containing a `( ... )` style forth comment.
//! * Successful input lines, starting with `> ...`.
//! * Successful output lines, starting with `< ...`.
//!     * Any successful input line can have zero or more output lines
//!     * If *no* output lines are specified, ANY successful output is accepted.
//! * Unsuccessful input lines, starting with `x ...`.
//!     * This line is expected to make `process_line` return an `Err()`.
//!     * There is no way to specify which error yet
//!     * Unsuccessful input lines may not have any successful output
//!
//! ### Example
//!
//! ```rust
//! # use tforth::testutil::runtest;
//! #
//! # runtest(r#"
//! ( specify VM settings with frontmatter )
//! ( data_stack_elems 1 )
//!
//! ( specify input with no output )
//! > : star 42 emit ;
//!
//! ( specify input and output )
//! > star
//! < *ok.
//!
//! ( specify lines that cause errors )
//! x starb
//! x 1 2
//! # "#)
//! ```

use crate::{Error, Forth, Params};

pub mod alloc;

/// Run the given ui test against a fresh VM with the full builtin set.
///
/// Accepts any/all/none of the configuration frontmatter listed above.
pub fn runtest(contents: &str) {
    let tokd = tokenize(contents, true).unwrap();
    let mut forth = Forth::new(tokd.settings, (), Forth::FULL_BUILTINS).unwrap();
    steps_with(tokd.steps.as_slice(), &mut forth);
}

/// Run the given ui test against the given VM.
///
/// Does not accept ui tests with frontmatter configuration (will panic).
pub fn runtest_with<T>(forth: &mut Forth<T>, contents: &str) {
    let tokd = tokenize(contents, false).unwrap();
    steps_with(tokd.steps.as_slice(), forth);
}

fn check_output(res: Result<(), Error>, outcome: &Outcome, output: &str) {
    println!("< {output}");
    match (res, outcome) {
        (Ok(()), Outcome::OkAnyOutput) => {}
        (Ok(()), Outcome::OkWithOutput(exp)) => {
            let act_lines = output.lines().collect::<Vec<&str>>();
            assert_eq!(act_lines.len(), exp.len(), "output: {output:?}");
            act_lines.iter().zip(exp.iter()).for_each(|(a, e)| {
                assert_eq!(a.trim_end(), e.trim_end());
            })
        }
        (Err(_e), Outcome::FatalError) => {}
        (res, exp) => {
            eprintln!("Error!");
            eprintln!("Expected: {exp:?}");
            eprintln!("Got: {res:?}");
            if res.is_ok() {
                eprintln!("Output:\n{output}");
            }
            panic!();
        }
    }
}

// Runs the given steps against the given forth VM.
//
// Panics on any mismatch
fn steps_with<T>(steps: &[Step], forth: &mut Forth<T>) {
    for Step { input, output: outcome } in steps {
        println!("> {input}");
        forth.input.fill(input).unwrap();
        let res = forth.process_line();
        check_output(res, outcome, forth.output.as_str());
        forth.output.clear();
    }
}

#[derive(Debug)]
enum Outcome {
    OkAnyOutput,
    OkWithOutput(Vec<String>),
    FatalError,
}

#[derive(Debug)]
struct Step {
    input: String,
    output: Outcome,
}

#[derive(Default, Debug)]
struct Tokenized {
    settings: Params,
    steps: Vec<Step>,
}

fn tokenize(contents: &str, allow_frontmatter: bool) -> Result<Tokenized, ()> {
    let mut output = Tokenized::default();
    let mut frontmatter_done = !allow_frontmatter;

    for line in contents.lines() {
        let (tok, remain) = if let Some(t) = line.trim_start().split_once(' ') {
            t
        } else {
            continue;
        };

        match tok {
            ">" => {
                frontmatter_done = true;
                output.steps.push(Step {
                    input: remain.to_string(),
                    output: Outcome::OkAnyOutput,
                });
            }
            "<" => {
                frontmatter_done = true;
                let cur_step = output.steps.last_mut().ok_or(())?;
                let expected_out = remain.to_string();
                match &mut cur_step.output {
                    Outcome::OkAnyOutput => {
                        cur_step.output = Outcome::OkWithOutput(vec![expected_out]);
                    }
                    Outcome::OkWithOutput(o) => o.push(expected_out),
                    Outcome::FatalError => panic!("Fatal error can't set output"),
                }
            }
            "x" => {
                frontmatter_done = true;
                output.steps.push(Step {
                    input: remain.to_string(),
                    output: Outcome::FatalError,
                });
            }
            "(" => {
                let mut split = remain.split_whitespace();
                let setting = match split.next() {
                    Some("data_stack_elems") => &mut output.settings.data_stack_elems,
                    Some("return_stack_elems") => &mut output.settings.return_stack_elems,
                    Some("temp_stack_elems") => &mut output.settings.temp_stack_elems,
                    Some("self_stack_elems") => &mut output.settings.self_stack_elems,
                    Some("input_buf_elems") => &mut output.settings.input_buf_elems,
                    Some("output_buf_elems") => &mut output.settings.output_buf_elems,
                    Some(_) => continue,
                    None => panic!(),
                };
                assert!(!frontmatter_done, "Unexpected frontmatter settings!");
                *setting = split.next().unwrap().parse::<usize>().unwrap();
                assert_eq!(Some(")"), split.next());
            }
            _ => {}
        }
    }

    Ok(output)
}
