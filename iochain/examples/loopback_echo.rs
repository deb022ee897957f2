use bytes::Bytes;
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use std::{io::Write, str::FromStr, sync::Arc, time::Duration};

use iochain::{
    IdleStatus, IoHandler, IoProcessor, IoServiceBuilder, IoSession, LoggingFilter, Message,
    Result, SessionConfig, TransportMetadata,
};

////////////////////////////////////////////////////////////////////////////////////////////////////
/// Upper-cases every line it receives and writes it back.
struct EchoHandler;

impl IoHandler for EchoHandler {
    fn session_opened(&self, session: &Arc<IoSession>) -> Result<()> {
        println!("session {} opened", session.id());
        Ok(())
    }

    fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<()> {
        let Some(bytes) = message.as_bytes() else {
            return Ok(());
        };
        let line = String::from_utf8_lossy(bytes).to_uppercase();
        if line.trim() == "BYE" {
            session.close_on_flush();
        } else {
            session.write(Bytes::from(line));
        }
        Ok(())
    }

    fn session_idle(&self, session: &Arc<IoSession>, status: IdleStatus) -> Result<()> {
        println!("session {} is {}", session.id(), status);
        Ok(())
    }

    fn session_closed(&self, session: &Arc<IoSession>) -> Result<()> {
        println!(
            "session {} closed after {} bytes read, {} bytes written",
            session.id(),
            session.read_bytes(),
            session.written_bytes()
        );
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
/// An in-memory transport: every flushed write lands on a channel.
struct LoopbackProcessor {
    wire: Sender<(u64, Bytes)>,
}

impl IoProcessor for LoopbackProcessor {
    fn flush(&self, session: &IoSession) {
        if session.is_write_suspended() {
            return;
        }
        while let Some(request) = session.poll_write_request() {
            let now = iochain::current_time_millis();
            if let Some(bytes) = request.message().as_bytes() {
                let _ = self.wire.send((session.id(), bytes.clone()));
                session.increase_written_bytes(bytes.len() as u64, now);
            }
            session.filter_chain().fire_message_sent(request);
        }
    }

    fn update_traffic_control(&self, session: &IoSession) {
        self.flush(session);
    }

    fn remove(&self, session: &IoSession) {
        session.destroy();
    }
}

fn drain(wire: &Receiver<(u64, Bytes)>) {
    while let Ok((id, bytes)) = wire.recv_timeout(Duration::from_millis(100)) {
        print!("session {} <= {}", id, String::from_utf8_lossy(&bytes));
    }
}

#[derive(Parser)]
#[command(name = "Loopback Echo")]
#[command(version = "0.1.0")]
#[command(about = "An example of an echo service over an in-memory transport", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = 2)]
    sessions: usize,
    #[arg(long, default_value_t = 3)]
    messages: usize,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_level = log::LevelFilter::from_str(&cli.log_level)?;
    if cli.debug {
        env_logger::Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{}:{} [{}] - {}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.level(),
                    record.args()
                )
            })
            .filter(None, log_level)
            .init();
    }

    let mut config = SessionConfig::default();
    config.set_idle_time(IdleStatus::BothIdle, 1);

    let service = IoServiceBuilder::connector(TransportMetadata::new("mem", "loopback", false, false))
        .handler(Arc::new(EchoHandler))
        .session_config(config)
        .filter("logger", Arc::new(LoggingFilter::new("loopback_echo")))
        .build()?;

    let (wire_tx, wire_rx) = crossbeam_channel::unbounded();
    let processor = Arc::new(LoopbackProcessor { wire: wire_tx });

    let sessions = (0..cli.sessions)
        .map(|_| service.new_session(processor.clone(), None, None))
        .collect::<Result<Vec<_>>>()?;

    for i in 0..cli.messages {
        for session in &sessions {
            let line = format!("hello #{} from session {}\n", i, session.id());
            session
                .filter_chain()
                .fire_message_received(Message::bytes(line));
        }
    }
    drain(&wire_rx);

    // long enough for the idle checker to notice
    std::thread::sleep(Duration::from_millis(2500));

    for session in &sessions {
        session
            .filter_chain()
            .fire_message_received(Message::bytes("bye\n"));
        session.close_future().await_uninterruptibly();
    }
    drain(&wire_rx);

    println!(
        "service handled {} sessions, {} messages in, {} messages out",
        service.cumulative_managed_session_count(),
        service.statistics().read_messages(),
        service.statistics().written_messages()
    );
    service.dispose(true);

    Ok(())
}
