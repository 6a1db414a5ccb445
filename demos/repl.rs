use calcxp::engine::{Engine, ExprSyntax};
use calcxp::value::TypeTag;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

fn main() {
    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The calculator encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn syntax_name(syntax: ExprSyntax) -> &'static str {
    match syntax {
        ExprSyntax::Prefix => "prefix",
        ExprSyntax::Infix => "infix",
        ExprSyntax::Postfix => "postfix",
    }
}

fn run_repl() {
    println!("calcxp expression calculator");
    println!("Reads infix expressions by default: 1 + 2 * 3, let([x = 2], x ** 10)");
    println!("Type :help for commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize the line editor");
    let engine = Engine::new();
    let mut syntax = ExprSyntax::Infix;

    loop {
        let prompt = format!("{}> ", syntax_name(syntax));
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":env" => {
                        print_environment(&engine);
                        continue;
                    }
                    ":infix" => {
                        syntax = ExprSyntax::Infix;
                        println!("Reading infix expressions.");
                        continue;
                    }
                    ":prefix" => {
                        syntax = ExprSyntax::Prefix;
                        println!("Reading prefix (s-expression) programs.");
                        continue;
                    }
                    ":postfix" => {
                        syntax = ExprSyntax::Postfix;
                        println!("Reading postfix (stack) programs.");
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }
                if let Some(rest) = line.strip_prefix(":base") {
                    set_base(&engine, rest.trim());
                    continue;
                }

                match evaluate(&engine, line, syntax) {
                    Ok(results) => {
                        for rendered in results {
                            println!("{rendered}");
                        }
                    }
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

/// Run one line and render every value it leaves behind. A line may
/// legitimately produce zero results (an empty pack) or several (postfix
/// programs, multi-value packs).
fn evaluate(
    engine: &Engine,
    line: &str,
    syntax: ExprSyntax,
) -> Result<Vec<String>, calcxp::Error> {
    let compiled = engine.compile(line, syntax)?;
    let mut frame = engine.new_frame();
    compiled.execute(&mut frame)?;
    Ok(frame
        .into_results()
        .iter()
        .map(|value| engine.render(value))
        .collect())
}

fn set_base(engine: &Engine, arg: &str) {
    match arg.parse::<u32>() {
        Ok(base) if (2..=36).contains(&base) => {
            let mut cfg = engine.print_config();
            cfg.base = base;
            engine.set_print_config(cfg);
            println!("Printing numbers in base {base}.");
        }
        _ => println!("Usage: :base N   (with N in 2..=36)"),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show the global bindings");
    println!("  :infix     - Read infix expressions (the default)");
    println!("  :prefix    - Read prefix (s-expression) programs");
    println!("  :postfix   - Read postfix (stack) programs");
    println!("  :base N    - Print numbers in base N (2 to 36)");
    println!("  :quit      - Exit the calculator");
    println!("  Ctrl+C     - Exit the calculator");
    println!();
    println!("Infix examples:");
    println!("  1 + 2 * 3");
    println!("  let([f = x -> x + 1], f(4))");
    println!("  sum(1, 2, 3.5)");
    println!("  \"x=%s\" % 42");
    println!("  0xff << 4");
    println!();
    println!("Prefix examples:");
    println!("  (+ 1 2 3)");
    println!("  (let [(= x 2)] (* x 21))");
    println!();
    println!("Postfix examples:");
    println!("  1 2 +");
    println!("  12 18 gcd");
    println!("  1 2 3 sum$3,1");
    println!();
}

fn print_environment(engine: &Engine) {
    let mut callables = Vec::new();
    let mut values = Vec::new();
    for (name, value) in engine.global_bindings() {
        if value.tag() == TypeTag::Callable {
            callables.push(name);
        } else {
            values.push((name, value));
        }
    }
    callables.sort();
    values.sort_by(|a, b| a.0.cmp(&b.0));

    println!("Callables ({}):", callables.len());
    let mut col = 0;
    for name in &callables {
        print!("  {name:<12}");
        col += 1;
        if col % 5 == 0 {
            println!();
        }
    }
    if col % 5 != 0 {
        println!();
    }
    println!();

    println!("Values ({}):", values.len());
    for (name, value) in values {
        println!("  {name} = {}", engine.render(&value));
    }
}
