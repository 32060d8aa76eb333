use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use worldbox_lanes::{Lane, LaneOutcome};
use worldbox_model::{WorldStore, EMPTY_WORLD};

use crate::collaborators::{ChatCompleter, ChatMessage, ChatRequest, ImagePainter};

/// Placeholder shown while the world is still the empty sentinel.
pub const PLACEHOLDER_IMAGE: &str = "https://placehold.co/400";

/// Image output lane: interprets the world document into a prose prompt,
/// then renders it.
///
/// Renders are keyed by instruction, document and manual click count;
/// a render whose key matches the previous one is skipped, so continuous
/// mode never re-renders an unchanged world while an explicit click always
/// gets a fresh image.
pub struct PaintSubsystem {
    store: Arc<WorldStore>,
    completer: Arc<dyn ChatCompleter>,
    painter: Arc<dyn ImagePainter>,
    lane: Lane,
    chat_model: String,
    image_model: Mutex<String>,
    instruction: Mutex<String>,
    clicks: AtomicU64,
    last_key: Mutex<String>,
    prompt_preview: watch::Sender<String>,
    image: watch::Sender<String>,
    continuous: Mutex<Option<CancellationToken>>,
}

impl PaintSubsystem {
    /// Wires the subsystem around the shared store.
    #[must_use]
    pub fn new(
        store: Arc<WorldStore>,
        completer: Arc<dyn ChatCompleter>,
        painter: Arc<dyn ImagePainter>,
        lane: Lane,
        chat_model: impl Into<String>,
        image_model: impl Into<String>,
    ) -> Self {
        let (prompt_preview, _) = watch::channel(String::new());
        let (image, _) = watch::channel(String::new());
        Self {
            store,
            completer,
            painter,
            lane,
            chat_model: chat_model.into(),
            image_model: Mutex::new(image_model.into()),
            instruction: Mutex::new(String::new()),
            clicks: AtomicU64::new(0),
            last_key: Mutex::new(String::new()),
            prompt_preview,
            image,
            continuous: Mutex::new(None),
        }
    }

    /// Sets the interpretation instruction.
    pub fn set_instruction(&self, instruction: impl Into<String>) {
        *self.instruction.lock() = instruction.into();
    }

    /// Switches the image-generation model.
    pub fn set_image_model(&self, model: impl Into<String>) {
        *self.image_model.lock() = model.into();
    }

    /// The prose prompt behind the last render.
    #[must_use]
    pub fn prompt_previews(&self) -> watch::Receiver<String> {
        self.prompt_preview.subscribe()
    }

    /// Locator of the last rendered image.
    #[must_use]
    pub fn images(&self) -> watch::Receiver<String> {
        self.image.subscribe()
    }

    /// Manual render trigger; always produces a fresh image.
    pub fn render(&self) -> Option<JoinHandle<LaneOutcome>> {
        self.clicks.fetch_add(1, Ordering::Relaxed);
        self.request_render()
    }

    /// Follows every world revision with a render while enabled.
    pub fn set_continuous(self: &Arc<Self>, enabled: bool) {
        let mut continuous = self.continuous.lock();
        if let Some(token) = continuous.take() {
            token.cancel();
        }
        if !enabled {
            return;
        }
        let token = CancellationToken::new();
        *continuous = Some(token.clone());
        let this = Arc::clone(self);
        let mut revisions = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                revisions.borrow_and_update();
                drop(this.request_render());
                tokio::select! {
                    () = token.cancelled() => break,
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn request_render(&self) -> Option<JoinHandle<LaneOutcome>> {
        let world = self.store.current();
        let instruction = self.instruction.lock().clone();
        let key = format!(
            "{instruction}::{world}::{}",
            self.clicks.load(Ordering::Relaxed)
        );
        {
            let mut last_key = self.last_key.lock();
            if *last_key == key {
                return None;
            }
            *last_key = key;
        }
        let prompt_tx = self.prompt_preview.clone();
        let image_tx = self.image.clone();
        if world == EMPTY_WORLD {
            return Some(self.lane.run(move |turn| async move {
                turn.checkpoint()?;
                prompt_tx.send_replace("Empty".to_string());
                image_tx.send_replace(PLACEHOLDER_IMAGE.to_string());
                Ok(())
            }));
        }
        let request = ChatRequest::new(
            self.chat_model.clone(),
            vec![
                ChatMessage::system(interpretation_instructions(&world)),
                ChatMessage::user(format!(
                    "Instruction: {}",
                    if instruction.is_empty() {
                        "Faithfully describe the scene.".to_string()
                    } else {
                        instruction
                    }
                )),
            ],
        );
        let completer = Arc::clone(&self.completer);
        let painter = Arc::clone(&self.painter);
        let image_model = self.image_model.lock().clone();
        Some(self.lane.run(move |turn| async move {
            let prompt = completer.complete(request, turn.token()).await?;
            turn.checkpoint()?;
            prompt_tx.send_replace(prompt.clone());
            let url = painter.render(&prompt, &image_model, turn.token()).await?;
            turn.checkpoint()?;
            image_tx.send_replace(url);
            Ok(())
        }))
    }
}

fn interpretation_instructions(world: &str) -> String {
    format!(
        "Follow the user's instruction to interpret the following XML world description into \
         a single paragraph of natural-language description.\n\n{world}\n\n\
         Requirements:\n\
         - Use the instruction to interpret subject and scene, foreground and background, \
         content and style, with as much detail as can be logically inferred.\n\
         - Be observative. Do not add narrative or emotional description.\n\
         - Be concise and describe a single scene; if several are described, depict the most \
         representative moment.\n"
    )
}
