//! framekit CLI - コマンドラインインターフェース
//!
//! 停止したプロセスのスタックフレームを調べるREPL

use anyhow::Result;
use clap::{Parser, Subcommand};
use framekit_core::{
    Command, Debugger, DisassemblySyntax, Frame, StopReason, TargetSettings, Value, ValueType, EXPR_LOG,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// ログフィルタを指定する環境変数
const LOG_ENV: &str = "FRAMEKIT_LOG";

/// 値を展開して表示する深さ
const PRINT_DEPTH: usize = 2;

/// framekit - Stack frame inspector
#[derive(Parser)]
#[command(name = "framekit")]
#[command(version = "0.1.0")]
#[command(about = "Inspect stack frames of a stopped process", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: DebugCommand,

    /// Disassembly syntax (intel or att)
    #[arg(long, global = true, default_value = "intel")]
    syntax: DisassemblySyntax,

    /// Maximum number of frames to unwind
    #[arg(long, global = true, default_value_t = 256)]
    max_frames: usize,

    /// Log level used when FRAMEKIT_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Attach to an existing process
    Attach {
        /// Path to the executable binary
        binary: String,

        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,
    },

    /// Load an executable without a process
    Inspect {
        /// Path to the executable binary
        binary: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    println!("framekit - Stack frame inspector");
    println!("Version 0.1.0");
    println!();

    let settings = TargetSettings {
        disassembly_syntax: cli.syntax,
        max_frames: cli.max_frames,
        ..TargetSettings::default()
    };
    let mut session = Session::new(init_debugger(cli.command, settings)?);
    session.run_repl()?;

    Ok(())
}

/// ログを標準エラー出力に設定する
///
/// `FRAMEKIT_LOG` があればそのフィルタを、なければ `--log-level` を使う。
/// 例: `FRAMEKIT_LOG=framekit::api=debug`
fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

/// デバッガを初期化してバイナリを読み込み、必要ならアタッチする
fn init_debugger(command: DebugCommand, settings: TargetSettings) -> Result<Debugger> {
    let mut debugger = Debugger::with_settings(settings);

    match command {
        DebugCommand::Attach { binary, pid } => {
            println!("Loading binary: {}", binary);
            let module = debugger.load_binary(&binary)?;
            println!("Loaded {} ({} symbols)", module.name(), module.symbols().all_symbols().count());

            let thread = debugger.attach(pid)?;
            println!("Attached to process {}", pid);
            println!("{}", thread.description());
        }
        DebugCommand::Inspect { binary } => {
            println!("Loading binary: {}", binary);
            let module = debugger.load_binary(&binary)?;
            println!("Loaded {} ({} symbols)", module.name(), module.symbols().all_symbols().count());
            println!("No process: only 'find' is available");
        }
    }
    println!();

    Ok(debugger)
}

/// REPLの状態
///
/// 選択中のフレームはハンドルで保持するため、停止をまたいでも同じフレームを指す。
struct Session {
    debugger: Debugger,
    selected: Frame,
}

impl Session {
    fn new(debugger: Debugger) -> Self {
        let selected = debugger.selected_thread().frame_at_index(0);
        Self { debugger, selected }
    }

    /// REPLループを実行する
    fn run_repl(&mut self) -> Result<()> {
        println!("Type 'help' for available commands, 'quit' to exit.");
        println!();

        let mut rl = DefaultEditor::new()?;

        loop {
            let readline = rl.readline("(framekit) ");
            match readline {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    rl.add_history_entry(line)?;

                    match Command::parse(line) {
                        Some(Command::Quit) => {
                            println!("Goodbye!");
                            break;
                        }
                        Some(command) => {
                            if let Err(e) = self.handle_command(command) {
                                eprintln!("Error: {}", e);
                            }
                        }
                        None => {
                            println!("Unknown command: {}", line);
                            println!("Type 'help' for available commands.");
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    eprintln!("Error: {:?}", err);
                    break;
                }
            }
        }

        Ok(())
    }

    fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Backtrace => self.backtrace(),
            Command::Frame(index) => self.select_frame(index),
            Command::Info => self.info(),
            Command::Registers(name) => self.registers(name.as_deref()),
            Command::Locals => print_list(&self.selected.variables(true, true, false, true)),
            Command::Vars => print_list(&self.selected.variables(true, true, true, false)),
            Command::Print(expr) => self.print(&expr),
            Command::Path(path) => print_value(&self.selected.value_for_variable_path(&path)),
            Command::Disassemble => match self.selected.disassemble() {
                Some(text) => print!("{}", text),
                None => println!("No disassembly available"),
            },
            Command::SetPc(pc) => {
                if self.selected.set_pc(pc) {
                    println!("{}", self.selected.description());
                } else {
                    println!("Cannot set pc of this frame");
                }
            }
            Command::Continue => {
                self.debugger.resume()?;
                println!("Process running. Use 'interrupt' to stop it.");
            }
            Command::Interrupt => self.interrupt()?,
            Command::Find(pattern) => self.find(&pattern),
            Command::Help => print_help(),
            Command::Quit => {}
        }
        Ok(())
    }

    fn backtrace(&self) {
        let thread = self.debugger.selected_thread();
        println!("* {}", thread.description());
        for frame in thread.frames() {
            let marker = if frame == self.selected { "*" } else { " " };
            println!("  {} {}", marker, frame.description());
        }
    }

    fn select_frame(&mut self, index: u32) {
        let frame = self.debugger.selected_thread().frame_at_index(index);
        if frame.is_valid() {
            println!("{}", frame.description());
            self.selected = frame;
        } else {
            println!("Frame index ({}) out of range", index);
        }
    }

    fn info(&self) {
        let frame = &self.selected;
        println!("{}", frame.description());
        if !frame.is_valid() {
            return;
        }
        if let Some(id) = frame.stack_id() {
            println!("  identity : {}", id);
        }
        println!("  stop     : #{}", self.debugger.target().stop_id());
        println!("  pc       : {}", frame.pc_address());
        println!("  sp       : 0x{:016x}", frame.sp());
        println!("  fp       : 0x{:016x}", frame.fp());
        if let Some(name) = frame.function_name() {
            let inlined = if frame.is_inlined() { " (inlined)" } else { "" };
            println!("  function : {}{}", name, inlined);
        }
        if let Some(unit) = frame.compile_unit() {
            println!("  unit     : {}", unit.name);
        }
        if let Some(entry) = frame.line_entry() {
            println!("  line     : {}:{}", entry.file, entry.line);
        }
    }

    fn registers(&self, name: Option<&str>) {
        let Some(name) = name else {
            for set in self.selected.registers().iter() {
                print_register_set(set);
            }
            return;
        };

        let set = self.selected.find_value(name, ValueType::RegisterSet);
        if set.is_valid() {
            print_register_set(&set);
            return;
        }
        let register = self.selected.find_value(name, ValueType::Register);
        if register.is_valid() {
            println!("{}", register);
        } else {
            println!("Invalid register name '{}'", name);
        }
    }

    fn print(&self, expr: &str) {
        let value = self.selected.evaluate_expression(expr);
        tracing::trace!(target: EXPR_LOG, expr, valid = value.is_valid(), "print");
        print_value(&value);
    }

    fn interrupt(&mut self) -> Result<()> {
        match self.debugger.interrupt()? {
            StopReason::Exited(code) => {
                println!("Process exited with code {}", code);
                return Ok(());
            }
            StopReason::Signal(signal) => println!("Process stopped by {:?}", signal),
            StopReason::Trap | StopReason::Other => println!("Process stopped"),
        }
        println!("Stop #{}", self.debugger.target().stop_id());

        // 選択中のフレームがまだスタックにあればそのまま使う
        if !self.selected.is_valid() {
            self.selected = self.debugger.selected_thread().frame_at_index(0);
        }
        println!("{}", self.selected.description());
        Ok(())
    }

    fn find(&self, pattern: &str) {
        let symbols = self.debugger.find_symbols(pattern);
        if symbols.is_empty() {
            println!("No symbols matching '{}' found", pattern);
            return;
        }

        println!("Symbols matching '{}' ({} found):", pattern, symbols.len());
        for (i, (module, sym)) in symbols.iter().take(10).enumerate() {
            let addr = module.load_address(sym.address);
            if sym.size > 0 {
                println!("  {}. {}`{} @ 0x{:x} (size: {})", i + 1, module.name(), sym.name, addr, sym.size);
            } else {
                println!("  {}. {}`{} @ 0x{:x}", i + 1, module.name(), sym.name, addr);
            }
        }
        if symbols.len() > 10 {
            println!("  ... and {} more", symbols.len() - 10);
        }
    }
}

fn print_list(values: &framekit_core::ValueList) {
    if values.is_empty() {
        println!("No variables");
        return;
    }
    for value in values {
        print_value(value);
    }
}

fn print_register_set(set: &Value) {
    println!("{}:", set.name().unwrap_or("registers"));
    for i in 0..set.num_children() {
        let reg = set.child_at_index(i);
        println!("  {:<6} = {}", reg.name().unwrap_or("?"), reg.value().unwrap_or_default());
    }
}

fn print_value(value: &Value) {
    match (value.is_valid(), value.error()) {
        (false, Some(error)) => println!("error: {}", error),
        (false, None) => println!("{}", value),
        (true, _) => {
            println!("{}", value);
            print_children(value, 1);
        }
    }
}

fn print_children(value: &Value, depth: usize) {
    if depth > PRINT_DEPTH || matches!(value.value_type(), ValueType::Register | ValueType::RegisterSet) {
        return;
    }
    // ポインタは自動で辿らない
    if value.type_info().is_some_and(|t| t.is_pointer_like()) {
        return;
    }
    for i in 0..value.num_children() {
        let child = value.child_at_index(i);
        println!("{}{}", "  ".repeat(depth), child);
        print_children(&child, depth + 1);
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help               - Show this help message");
    println!("  quit/exit/q        - Exit the debugger");
    println!();
    println!("Frame commands:");
    println!("  backtrace (bt)     - Show frames of the selected thread");
    println!("  frame <n> (f)      - Select frame n");
    println!("  info (i)           - Show details of the selected frame");
    println!("  registers [name]   - Show register sets or one register/set");
    println!("  locals (l)         - Show arguments and locals in scope");
    println!("  vars (v)           - Show all variables including statics");
    println!("  print <expr> (p)   - Evaluate an expression and store it as $N");
    println!("  path <path>        - Look up a variable path (a.b, p->c, v[2], *p, &x)");
    println!("  disassemble        - Disassemble the current function");
    println!("  set-pc <addr>      - Change pc of frame 0");
    println!();
    println!("Process commands:");
    println!("  continue (c)       - Resume the process");
    println!("  interrupt          - Stop the process and capture frames");
    println!("  find <pattern>     - Find symbols matching pattern");
    println!();
    println!("Set FRAMEKIT_LOG=framekit::api=debug to trace every frame call.");
}
