use super::*;

type Reply<T> = tokio::sync::oneshot::Sender<T>;

/// Commands sent from API -> Bevy
pub enum ApiCommand {
    Execute(RitualSubmission, Reply<RitualResult>),
    GetErrors(Reply<ErrorState>),
    ResetErrors(Reply<ErrorState>),
    GetPage(Reply<PageSnapshot>),
    GetAudio(Reply<Vec<SynthEvent>>),
    GetRegistries(Reply<RegistryStats>),
    SetPointer(PointerRequest, Reply<usize>),
    SetProcessing(bool, Reply<()>),
    SelectOption(String, Reply<bool>),
    DispatchEvent(String, serde_json::Value, Reply<usize>),
    GetCapabilities(Reply<Vec<CatalogLine>>),
    GetEvents(Option<u64>, Reply<Vec<EventRecord>>),
}

#[derive(Resource)]
pub struct ApiChannels {
    pub receiver: Receiver<ApiCommand>,
}

/// Apply one command to the sandbox. Replies to a caller that hung up are dropped.
pub(super) fn handle_command(sandbox: &mut Sandbox, command: ApiCommand) {
    match command {
        ApiCommand::Execute(submission, tx) => {
            let label = submission
                .label
                .filter(|label| !label.trim().is_empty())
                .unwrap_or_else(|| "api".to_string());
            let outcome = sandbox.execute(&submission.code, &label);
            let _ = tx.send(RitualResult {
                outcome,
                errors: sandbox.error_state(),
            });
        }
        ApiCommand::GetErrors(tx) => {
            let _ = tx.send(sandbox.error_state());
        }
        ApiCommand::ResetErrors(tx) => {
            sandbox.reset_error_count();
            let _ = tx.send(sandbox.error_state());
        }
        ApiCommand::GetPage(tx) => {
            let _ = tx.send(sandbox.page_snapshot());
        }
        ApiCommand::GetAudio(tx) => {
            let _ = tx.send(sandbox.audio_events());
        }
        ApiCommand::GetRegistries(tx) => {
            let _ = tx.send(sandbox.registry_stats());
        }
        ApiCommand::SetPointer(pointer, tx) => {
            sandbox.set_pointer(pointer.x, pointer.y);
            let payload = serde_json::json!({ "clientX": pointer.x, "clientY": pointer.y });
            let _ = tx.send(sandbox.dispatch_event("mousemove", &payload));
        }
        ApiCommand::SetProcessing(active, tx) => {
            sandbox.set_processing(active);
            let _ = tx.send(());
        }
        ApiCommand::SelectOption(label, tx) => {
            let _ = tx.send(sandbox.select_option(&label));
        }
        ApiCommand::DispatchEvent(name, payload, tx) => {
            let _ = tx.send(sandbox.dispatch_event(&name, &payload));
        }
        ApiCommand::GetCapabilities(tx) => {
            let _ = tx.send(sandbox.table().catalog_lines());
        }
        ApiCommand::GetEvents(since, tx) => {
            let events = match since {
                Some(seq) => sandbox.events_since(seq),
                None => sandbox.recent_events(),
            };
            let _ = tx.send(events);
        }
    }
}

/// Drain queued API commands against the sandbox, one at a time.
pub(super) fn process_api_commands(
    channels: Res<ApiChannels>,
    mut sandbox: NonSendMut<RitualSandbox>,
) {
    for command in channels.receiver.try_iter().take(MAX_COMMANDS_PER_FRAME) {
        handle_command(&mut sandbox.0, command);
    }
}
