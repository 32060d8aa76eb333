//! Interactive console studio wiring every Worldbox subsystem together.

use std::{
    io::{self, Write},
    sync::Arc,
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};

use shared_event_bus::MemoryEventBus;
use shared_logging::{FanoutSink, JsonLogger, LogSink, MemoryLogger};
use worldbox_lanes::{Lane, LaneTelemetry};
use worldbox_model::{archive, ModelTelemetry, WorldStore};
use worldbox_subsystems::{
    ChatSubsystem, DictateSubsystem, DiscussionSubsystem, HttpChatClient, HttpImageClient,
    InterviewSubsystem, ObserveSubsystem, PaintSubsystem, RealtimeConversation,
    SpeechSynthesizer, SubsystemTelemetry, WritingSubsystem,
};
use worldbox_talk::{FieldBank, SpeechRecognizer, TalkRouter};
use worldbox_vision::{ChangeStream, Frame};

#[path = "studio_config.rs"]
mod studio_config;

use studio_config::StudioConfig;

/// Synthesizer that voices utterances on the console.
struct ConsoleSpeech;

impl SpeechSynthesizer for ConsoleSpeech {
    fn speak(&self, text: &str, voice: Option<&str>) {
        match voice {
            Some(voice) => println!("[speak:{voice}] {text}"),
            None => println!("[speak] {text}"),
        }
    }

    fn clear(&self) {
        println!("[speak] (queue cleared)");
    }
}

/// Recognition resource stub: sessions are announced, results are fed in
/// through the `hear` command.
struct ConsoleRecognizer;

impl SpeechRecognizer for ConsoleRecognizer {
    fn start(&self) -> Result<()> {
        println!("[stt] listening…");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        println!("[stt] stopped");
        Ok(())
    }
}

/// Realtime session stub: shows what the live transport would receive.
struct ConsoleRealtime;

impl RealtimeConversation for ConsoleRealtime {
    fn start(&self) -> Result<()> {
        println!("[realtime] session opened");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        println!("[realtime] session closed");
        Ok(())
    }

    fn set_instructions(&self, instructions: &str) {
        println!(
            "[realtime] instructions refreshed ({} chars)",
            instructions.len()
        );
    }

    fn install_tools(&self, _tools: worldbox_model::ToolRegistry) {
        println!("[realtime] mutation tools installed");
    }

    fn send_user_message(&self, text: &str) {
        println!("[realtime] > {text}");
    }

    fn set_microphone_muted(&self, muted: bool) {
        println!("[realtime] microphone {}", if muted { "muted" } else { "open" });
    }
}

struct Studio {
    config: StudioConfig,
    store: Arc<WorldStore>,
    ops_log: Arc<MemoryLogger>,
    chat: Arc<ChatSubsystem>,
    dictate: Arc<DictateSubsystem>,
    observe: Arc<ObserveSubsystem>,
    interview: Arc<InterviewSubsystem>,
    discussion: Arc<DiscussionSubsystem>,
    paint: Arc<PaintSubsystem>,
    writing: Arc<WritingSubsystem>,
    router: Arc<TalkRouter>,
    frames: ChangeStream,
    camera_note: Arc<Mutex<String>>,
}

impl Studio {
    async fn bootstrap(config: StudioConfig) -> Result<Self> {
        let log_dir = config.logging.dir.clone();
        let ops_log = Arc::new(MemoryLogger::new(256));
        let bus = Arc::new(MemoryEventBus::new(256));

        // Every telemetry stream lands in its JSONL file and in the
        // in-memory tail behind the `log` command.
        let tee = |file: &str| -> Option<Arc<dyn LogSink>> {
            JsonLogger::new(log_dir.join(file)).ok().map(|logger| {
                Arc::new(FanoutSink::new(vec![
                    Arc::new(logger) as Arc<dyn LogSink>,
                    ops_log.clone() as Arc<dyn LogSink>,
                ])) as Arc<dyn LogSink>
            })
        };
        let model_telemetry = {
            let mut builder = ModelTelemetry::builder("model").event_publisher(bus.clone());
            if let Some(sink) = tee("model.log.jsonl") {
                builder = builder.sink(sink);
            }
            builder.build().ok()
        };
        let lane_telemetry = {
            let mut builder = LaneTelemetry::builder("lanes").event_publisher(bus.clone());
            if let Some(sink) = tee("lanes.log.jsonl") {
                builder = builder.sink(sink);
            }
            builder.build().ok()
        };
        let subsystem_telemetry = {
            let mut builder =
                SubsystemTelemetry::builder("subsystems").event_publisher(bus);
            if let Some(sink) = tee("subsystems.log.jsonl") {
                builder = builder.sink(sink);
            }
            builder.build().ok()
        };

        let mut store = WorldStore::new();
        if let Some(telemetry) = model_telemetry {
            store = store.with_telemetry(telemetry);
        }
        let store = Arc::new(store);

        let completer = Arc::new(
            HttpChatClient::new(config.llm.endpoint.clone(), config.llm.api_key.clone())
                .context("building chat collaborator")?,
        );
        let painter = Arc::new(
            HttpImageClient::new(config.image.endpoint.clone(), config.image.api_key.clone())
                .context("building image collaborator")?,
        );
        let speech = Arc::new(ConsoleSpeech);

        let lane = |name: &str| {
            lane_telemetry.clone().map_or_else(
                || Lane::new(name),
                |telemetry| Lane::new(name).with_telemetry(telemetry),
            )
        };

        let chat = Arc::new(ChatSubsystem::new(
            Arc::clone(&store),
            completer.clone(),
            speech.clone(),
            lane("chat"),
            config.llm.chat_model.clone(),
        ));
        let dictate = Arc::new(DictateSubsystem::new(
            Arc::clone(&store),
            completer.clone(),
            lane("dictate"),
            config.llm.chat_model.clone(),
        ));
        let mut observe_subsystem = ObserveSubsystem::new(
            Arc::clone(&store),
            completer.clone(),
            lane("observe"),
            config.llm.vision_model.clone(),
        );
        if let Some(telemetry) = subsystem_telemetry {
            observe_subsystem = observe_subsystem.with_telemetry(telemetry);
        }
        let observe = Arc::new(observe_subsystem);
        let interview = Arc::new(InterviewSubsystem::new(
            Arc::new(ConsoleRealtime),
            Arc::clone(&store),
        ));
        let discussion = Arc::new(DiscussionSubsystem::new(
            Arc::clone(&store),
            completer.clone(),
            speech,
            lane("discussion"),
            config.llm.chat_model.clone(),
        ));
        let paint = Arc::new(PaintSubsystem::new(
            Arc::clone(&store),
            completer.clone(),
            painter,
            lane("paint"),
            config.llm.chat_model.clone(),
            config.image.model.clone(),
        ));
        let writing = Arc::new(WritingSubsystem::new(
            Arc::clone(&store),
            completer,
            lane("writing"),
            config.llm.chat_model.clone(),
        ));

        let router = Arc::new(
            TalkRouter::new(
                config.talk.triggers.clone(),
                Arc::new(ConsoleRecognizer),
                Arc::new(FieldBank::new()),
            )
            .with_logger(ops_log.clone() as Arc<dyn LogSink>),
        );
        Self::route_recognitions(&router, &chat, &dictate);

        let (frames, changes) = ChangeStream::spawn(config.vision);
        let camera_note = Arc::new(Mutex::new("an empty room".to_string()));
        Self::follow_frame_changes(changes, &observe, &camera_note);

        Ok(Self {
            config,
            store,
            ops_log,
            chat,
            dictate,
            observe,
            interview,
            discussion,
            paint,
            writing,
            router,
            frames,
            camera_note,
        })
    }

    /// Recognized speech lands in a field; the field decides the producer.
    fn route_recognitions(
        router: &Arc<TalkRouter>,
        chat: &Arc<ChatSubsystem>,
        dictate: &Arc<DictateSubsystem>,
    ) {
        let mut routed = router.subscribe();
        let chat = Arc::clone(chat);
        let dictate = Arc::clone(dictate);
        tokio::spawn(async move {
            while let Ok(utterance) = routed.recv().await {
                match utterance.target.as_str() {
                    "chat-input" => drop(chat.submit(utterance.text)),
                    "dictate-input" => drop(dictate.submit(utterance.text)),
                    _ => {}
                }
            }
        });
    }

    /// Debounced frame changes become observation captures.
    fn follow_frame_changes(
        mut changes: mpsc::Receiver<worldbox_vision::ChangeEvent>,
        observe: &Arc<ObserveSubsystem>,
        camera_note: &Arc<Mutex<String>>,
    ) {
        let observe = Arc::clone(observe);
        let camera_note = Arc::clone(camera_note);
        tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let note = camera_note.lock().clone();
                println!(
                    "[camera] change detected (diff {:.3}), describing…",
                    change.diff_ratio
                );
                drop(observe.ingest(note));
            }
        });
    }

    async fn run(&mut self) -> Result<()> {
        println!("Worldbox studio ready. Type 'help' for commands.");
        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin).lines();
        loop {
            print!("worldbox> ");
            io::stdout().flush()?;
            let line = match reader.next_line().await? {
                Some(line) => line.trim().to_string(),
                None => break,
            };
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, ' ');
            let command = parts.next().unwrap_or_default();
            let args = parts.next().unwrap_or("").trim();
            match command {
                "world" => println!("{}", self.store.current()),
                "forget" => {
                    self.store.reset();
                    println!("World model forgotten.");
                }
                "say" => self.handle_say(args),
                "chat-goal" => self.chat.set_goal(args),
                "start-chat" => drop(self.chat.start_session()),
                "dictate" => self.handle_dictate(args),
                "talk" => self.handle_talk(args, true),
                "release" => self.handle_talk(args, false),
                "hear" => self.router.on_result(args),
                "fields" => self.print_fields(),
                "observe" => drop(self.observe.ingest(args.to_string())),
                "camera-note" => self.set_camera_note(args),
                "frame" => self.handle_frame(args).await,
                "temporal" => self.observe.set_temporal(args == "on"),
                "write" => drop(self.writing.write(args.to_string())),
                "paint" => self.handle_paint(),
                "paint-instruction" => self.paint.set_instruction(args),
                "continuous" => self.paint.set_continuous(args == "on"),
                "discuss" => self.handle_discuss(),
                "discuss-requirement" => self.discussion.set_requirement(args),
                "interview" => self.handle_interview(args)?,
                "ptt" => self.interview.set_push_to_talk(args == "on"),
                "export" => self.handle_export(args).await?,
                "import" => self.handle_import(args).await?,
                "status" => self.print_status(),
                "log" => self.print_log(args),
                "help" => Self::print_help(),
                "exit" | "quit" => break,
                other => println!("Unknown command: {other}. Type 'help' for usage."),
            }
        }
        self.frames.shutdown();
        Ok(())
    }

    fn handle_say(&self, args: &str) {
        if args.is_empty() {
            println!("Usage: say <utterance>");
            return;
        }
        drop(self.chat.submit(args));
        println!("Queued for the conversation lane.");
    }

    fn handle_dictate(&self, args: &str) {
        if args.is_empty() {
            println!("Usage: dictate <instruction>");
            return;
        }
        drop(self.dictate.submit(args));
        println!("Queued for the dictation lane.");
    }

    fn handle_talk(&self, action: &str, press: bool) {
        let result = if press {
            self.router.press(action)
        } else {
            self.router.release(action)
        };
        if let Err(err) = result {
            println!("{err:#}");
        }
    }

    fn print_fields(&self) {
        for name in self.router.fields().names() {
            let content = self.router.fields().get(&name).unwrap_or_default();
            println!("{name}: {content}");
        }
    }

    fn set_camera_note(&self, args: &str) {
        *self.camera_note.lock() = args.to_string();
    }

    async fn handle_frame(&self, args: &str) {
        let mut channels = args
            .split_whitespace()
            .map(|v| v.parse::<u8>().unwrap_or(0));
        let (r, g, b) = (
            channels.next().unwrap_or(0),
            channels.next().unwrap_or(0),
            channels.next().unwrap_or(0),
        );
        let frame = Frame::filled(64, 64, [r, g, b, 255]);
        if self.frames.submit(frame).await {
            println!("Frame submitted ({r} {g} {b}).");
        } else {
            println!("Frame stream is down.");
        }
    }

    fn handle_paint(&self) {
        match self.paint.render() {
            Some(_) => println!("Render started."),
            None => println!("Nothing changed since the last render."),
        }
    }

    fn handle_discuss(&self) {
        if self.discussion.toggle().is_some() {
            println!("Discussion started.");
        } else {
            println!("Discussion stopped.");
        }
    }

    fn handle_interview(&self, args: &str) -> Result<()> {
        match args {
            "start" => {
                self.interview.start()?;
                println!("Interview running.");
            }
            "stop" => {
                self.interview.stop()?;
                println!("Interview stopped.");
            }
            goal if !goal.is_empty() => self.interview.set_goal(goal),
            _ => println!("Usage: interview <start|stop|goal text>"),
        }
        Ok(())
    }

    async fn handle_export(&self, args: &str) -> Result<()> {
        let path = if args.is_empty() {
            archive::export(&self.store, &self.config.export_dir).await?
        } else {
            let path = std::path::PathBuf::from(args);
            archive::export_to(&self.store, &path).await?;
            path
        };
        println!("World exported to {}.", path.display());
        Ok(())
    }

    async fn handle_import(&self, args: &str) -> Result<()> {
        if args.is_empty() {
            println!("Usage: import <path>");
            return Ok(());
        }
        archive::import(&self.store, args).await?;
        println!("World imported from {args}.");
        Ok(())
    }

    fn print_status(&self) {
        let world = self.store.current();
        println!(
            "world: {} bytes{}",
            world.len(),
            if self.store.is_empty() { " (empty)" } else { "" }
        );
        println!(
            "chat: {} queued · dictate: {} queued",
            self.chat.pending_inputs(),
            self.dictate.pending_inputs()
        );
        println!(
            "observe: {} describe call(s) in flight",
            *self.observe.pending_tasks().borrow()
        );
        println!(
            "interview: {} · discussion: {} · talk session: {}",
            if self.interview.is_running() { "running" } else { "idle" },
            if self.discussion.is_running() { "running" } else { "idle" },
            if self.router.session_active() { "armed" } else { "idle" },
        );
    }

    fn print_log(&self, args: &str) {
        let count = args.parse().unwrap_or(10);
        for record in self.ops_log.tail(count) {
            println!(
                "{} [{}] {}",
                record.timestamp.format("%H:%M:%S"),
                record.module,
                record.message
            );
        }
    }

    fn print_help() {
        println!(
            "\
Commands:
  world | forget | status | log [n]
  say <text>             chat turn (chat-goal <text>, start-chat)
  dictate <text>         structural instruction
  talk <action> / release <action> / hear <text> / fields
  frame <r g b> | camera-note <text> | observe <payload> | temporal on|off
  write <prompt>
  paint | paint-instruction <text> | continuous on|off
  discuss | discuss-requirement <text>
  interview start|stop|<goal> | ptt on|off
  export [path] | import <path>
  exit"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = StudioConfig::load_or_default("worldbox.toml")?;
    let mut studio = Studio::bootstrap(config).await?;
    studio.run().await
}
