//! End-to-end scenarios driven through the `ScriptEngine` facade, with real
//! script files in temporary directories.

use std::path::PathBuf;

use tempfile::TempDir;
use textknife::config::EngineConfig;
use textknife::engine::ScriptEngine;
use textknife::host::{Host, MemorySink, StdFiles, StdOs};
use textknife::script::SigilProfile;

struct Fixture {
    dir: TempDir,
    engine: ScriptEngine,
    sink: MemorySink,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sink = MemorySink::new();
        let host = Host::new(
            Box::new(StdFiles),
            Box::new(StdOs::in_dir(dir.path())),
            Box::new(sink.clone()),
        );
        let engine = ScriptEngine::with_host(host, config);
        Fixture { dir, engine, sink }
    }

    fn write(&self, name: &str, text: &str) {
        std::fs::write(self.dir.path().join(name), text).unwrap();
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).unwrap()
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `src` as `name`, load it and run it; returns the exit status.
    fn run_file(&mut self, name: &str, src: &str) -> i32 {
        self.write(name, src);
        let path = self.path(name);
        self.engine.load_script(name, &path).unwrap();
        self.engine.select_script(name).unwrap();
        self.engine.test_and_run()
    }

    fn lines(&self, buffer: &str) -> Vec<String> {
        self.engine.buffers().get(buffer).unwrap().lines().to_vec()
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn split_sort_join() {
    let mut f = Fixture::new();
    let src = "n = buffer.split ~data \"Jonny,Charly,Adam,Berta\" \",\"\n\
               buffer.sort ~data\n\
               s = buffer.join ~data \";\"\n\
               log $(n) $(s)\n";
    assert_eq!(f.run_file("sort.tk", src), 0);
    assert_eq!(f.sink.messages(), vec!["4 Adam;Berta;Charly;Jonny"]);
}

#[test]
fn cursor_walk() {
    let mut f = Fixture::new();
    let src = "copy <<EOS\nLine1\nLine2\nLine3 abc\nEOS\n\
               move s/bc/\n\
               move 1:3\n\
               move +1:-1\n\
               move +1\n\
               move 0:+99\n\
               log $(__position) $(__mark)\n";
    assert_eq!(f.run_file("walk.tk", src), 0);
    assert_eq!(f.sink.messages(), vec!["3:10 1:1"]);
}

#[test]
fn delete_ranges() {
    let mut f = Fixture::new();
    let src = "copy <<EOS\nabcd\na23456\nb23456\nc23456\nEOS\n\
               delete from 2:2 excluding 2:3\n\
               delete behind 3:2 excluding 3:5\n\
               delete from 4:2 count 3\n";
    assert_eq!(f.run_file("del.tk", src), 0);
    assert_eq!(f.lines("_main"), vec!["abcd", "a3456", "b256", "c56"]);
}

#[test]
fn delete_including_takes_end_column() {
    let mut f = Fixture::new();
    let src = "copy <<EOS\nabcd\na23456\nEOS\n\
               delete from 2:2 including 2:4\n";
    assert_eq!(f.run_file("incl.tk", src), 0);
    assert_eq!(f.lines("_main"), vec!["abcd", "a56"]);
}

#[test]
fn interpolated_patterns_and_match_variables() {
    let mut f = Fixture::new();
    let src = "copy <<EOS ~other\nfoo bar\nEOS\n\
               word = bar\n\
               move ~other s/$(word)/\n\
               log \"hit:\" $(__hit) $(__start)\n\
               replace ~other s/\\b$(word)$/ \"[$0]\"\n";
    assert_eq!(f.run_file("pat.tk", src), 0);
    assert_eq!(f.sink.messages(), vec!["hit: bar 1:5"]);
    assert_eq!(f.lines("other"), vec!["foo [bar]"]);
}

#[test]
fn conditional_assignment() {
    let mut f = Fixture::new();
    let src = "x := 3\nx ?= 2\ny ?= \"Hi\"\nlog $(x) $(y)\n";
    assert_eq!(f.run_file("assign.tk", src), 0);
    assert_eq!(f.sink.messages(), vec!["3 Hi"]);
}

#[test]
fn heredoc_quoting() {
    let mut f = Fixture::new();
    let src = "name = box\n\
               copy <<'EOS' ~verbatim\nhello $(name)\nEOS\n\
               copy <<EOS ~expanded\nhello $(name)\nEOS\n";
    assert_eq!(f.run_file("here.tk", src), 0);
    assert_eq!(f.lines("verbatim"), vec!["hello $(name)"]);
    assert_eq!(f.lines("expanded"), vec!["hello box"]);
}

#[test]
fn read_only_runs_are_idempotent() {
    let mut f = Fixture::new();
    f.write("data.txt", "alpha\nbeta\ngamma\n");
    let src = "load data.txt\n\
               while s/a/\n\
                 move s/a/\n\
                 log $(__start) $(__hit)\n\
               endwhile\n\
               if s/zeta/\nlog never\nendif\n\
               log $(__lines)\n";
    assert_eq!(f.run_file("ro.tk", src), 0);
    let first = f.sink.messages();
    f.sink.clear();
    assert_eq!(f.engine.test_and_run(), 0);
    assert_eq!(f.sink.messages(), first);
    assert_eq!(first.last().map(String::as_str), Some("3"));
}

#[test]
fn load_transform_store() {
    let mut f = Fixture::new();
    f.write("in.txt", "# header\nkey = 1\nother = 2\n");
    let src = "load ~cfg in.txt\n\
               replace ~cfg s/^(\\w+) = (\\d+)$/ \"$1=$2\"\n\
               delete ~cfg line 1\n\
               store ~cfg out.txt\n\
               log $(__replaced)\n";
    assert_eq!(f.run_file("xform.tk", src), 0);
    assert_eq!(f.read("out.txt"), "key=1\nother=2\n");
}

#[test]
fn exit_status_mapping() {
    let mut f = Fixture::new();
    assert_eq!(f.run_file("a.tk", "log fine\n"), 0);
    assert_eq!(f.run_file("b.tk", "call inner\nscript inner\nexit 9 global\nendscript\n"), 9);
    assert_eq!(f.run_file("c.tk", "stop giving up\n"), 1);
    assert_eq!(f.run_file("d.tk", "load nowhere.txt\n"), 2);
    let records = f.sink.records();
    assert_eq!(records[1].1, "giving up");
    assert!(records[2].1.starts_with("d.tk:1: load "), "{records:?}");
}

#[test]
fn sibling_script_file_call() {
    let mut f = Fixture::new();
    std::fs::create_dir(f.path("lib")).unwrap();
    std::fs::write(
        f.path("lib/double.tk"),
        "r := n * 2\ncopy \"header\" ~_result\nbuffer.push ~_result $(r)\nexit 3\n",
    )
    .unwrap();
    std::fs::write(
        f.path("lib/main.tk"),
        "call double.tk n=21\n\
         skipped = buffer.shift ~_result\n\
         log $(_rc) $(skipped) ~_result\n",
    )
    .unwrap();
    let main = f.path("lib/main.tk");
    f.engine.load_script("main", &main).unwrap();
    assert_eq!(f.engine.test_and_run(), 0);
    assert_eq!(f.sink.messages(), vec!["3 header 42"]);
}

#[test]
fn defined_variables_and_arguments() {
    let mut f = Fixture::new();
    f.engine.define_variable("argc", 2i64);
    f.engine.define_variable("arg1", "in.txt");
    f.engine.define_variable("arg2", "out.txt");
    let src = "if argc < 2\nstop usage\nendif\nlog $(arg1) -> $(arg2)\n";
    assert_eq!(f.run_file("args.tk", src), 0);
    assert_eq!(f.sink.messages(), vec!["in.txt -> out.txt"]);
}

#[test]
fn bang_sigils() {
    let config = EngineConfig {
        sigils: SigilProfile::Bang,
        ..EngineConfig::default()
    };
    let mut f = Fixture::with_config(config);
    let src = "who = world\ncopy \"hello\" !greeting\nlog !greeting !(who)\n";
    assert_eq!(f.run_file("bang.tk", src), 0);
    assert_eq!(f.sink.messages(), vec!["hello world"]);
}

#[test]
fn listfiles_and_path_helpers() {
    let mut f = Fixture::new();
    f.write("a.txt", "");
    f.write("b.log", "");
    f.write("c.txt", "");
    let src = "n = os.listfiles . ~files include=\"\\.txt$\"\n\
               buffer.sort ~files\n\
               first = buffer.shift ~files\n\
               ext = os.changeextension $(first) md\n\
               log $(n) $(ext)\n";
    assert_eq!(f.run_file("ls.tk", src), 0);
    assert_eq!(f.sink.messages(), vec!["2 a.md"]);
}

#[test]
fn trace_file_records_statements() {
    let mut f = Fixture::new();
    let trace = f.path("trace.log");
    f.engine.set_trace(trace.to_str().unwrap()).unwrap();
    assert_eq!(f.run_file("t.tk", "i := 0\nwhile i < 2\ni := i + 1\nendwhile\n"), 0);
    f.engine.clear_trace();
    let text = std::fs::read_to_string(&trace).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.first(), Some(&"t.tk:1: i := 0"));
    assert_eq!(lines.iter().filter(|l| l.ends_with("i := i + 1")).count(), 2);
}

#[test]
fn parse_errors_name_the_file() {
    let mut f = Fixture::new();
    f.write("broken.tk", "if 1\nlog a\n");
    let err = f
        .engine
        .load_script("broken.tk", &f.path("broken.tk"))
        .unwrap_err();
    assert!(err.to_string().starts_with("broken.tk:1:"), "{err}");
}
