use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

use tombola_client::{
    ApiClient, ApiError, AuthenticatedUser, FeedbackScheduler, IdentityStore, ResolvedIdentity,
    RoomState, RoomView, Transport, ViewError,
};
use tombola_protocol::{
    CreateRoomRequest, JoinRoomRequest, ParticipantId, RoomCode, WinRule, FREE_NUMBER,
};

#[derive(Parser)]
#[command(name = "room_cli", about = "Terminal front end for tombola rooms")]
struct Args {
    /// Base URL of the game server
    #[arg(long, default_value = "http://127.0.0.1:3001")]
    server: String,

    /// Directory holding locally persisted visitor identities
    #[arg(long, default_value = "./tombola_data")]
    data_dir: PathBuf,

    /// Authenticated identity from the auth provider (hosts only)
    #[arg(long)]
    host_id: Option<String>,

    /// Display name that goes with --host-id
    #[arg(long)]
    host_name: Option<String>,

    /// Disable audio cues
    #[arg(long)]
    silent: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a room and enter it as host
    Create {
        name: String,
        #[arg(long, default_value_t = 10)]
        max_cards: u32,
        /// Comma-separated win rules: line, column, diagonal, full
        #[arg(long, value_delimiter = ',', default_value = "line,column,full")]
        rules: Vec<String>,
    },
    /// Join a room as a visitor, then enter it
    Join {
        code: String,
        #[arg(long)]
        nickname: String,
    },
    /// Enter a room previously joined or hosted
    Enter { code: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let base = Url::parse(&args.server).context("invalid --server URL")?;
    let api = ApiClient::new(base);
    let store = IdentityStore::open(&args.data_dir)?;

    let auth = args.host_id.map(|id| AuthenticatedUser {
        id: ParticipantId::new(id),
        display_name: args.host_name.unwrap_or_else(|| "Host".to_string()),
    });

    let code = match args.command {
        Command::Create {
            name,
            max_cards,
            rules,
        } => {
            let user = auth
                .as_ref()
                .context("--host-id is required to create a room")?;
            let request = CreateRoomRequest {
                name,
                host_id: user.id.clone(),
                host_name: user.display_name.clone(),
                max_cards,
                rules: parse_rules(&rules)?,
            };
            let room = api.create_room(&request).await?;
            println!("room created: {} (share code {})", room.name, room.code);
            room.code
        }
        Command::Join { code, nickname } => {
            let code = RoomCode::new(&code);
            let visitor_id = store.remember_nickname(&code, &nickname)?;
            let request = JoinRoomRequest {
                room_code: code.clone(),
                visitor_id,
                nickname,
            };
            api.join_room(&request).await?;
            println!("joined room {code}");
            code
        }
        Command::Enter { code } => RoomCode::new(&code),
    };

    let transport = Transport::connect(api.websocket_url()?);
    let feedback = if args.silent {
        FeedbackScheduler::disabled()
    } else {
        FeedbackScheduler::start()
    };

    let mut view = match RoomView::open(
        api,
        transport.clone(),
        &store,
        code,
        auth.as_ref(),
        feedback,
    )
    .await
    {
        Ok(view) => view,
        Err(ViewError::Api(ApiError::NotFound)) => {
            eprintln!("room not found; join it first: room_cli join <CODE> --nickname <NAME>");
            transport.shutdown();
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    print_state(&view.state(), view.identity());

    let mut watch = view.watch();
    let identity = view.identity().clone();
    let printer = tokio::spawn(async move {
        while watch.changed().await.is_ok() {
            let state = watch.borrow_and_update().clone();
            print_state(&state, &identity);
        }
    });

    let mut notices = view.notices();
    let notice_printer = tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            println!(">>> {notice}");
        }
    });

    println!("commands: start | draw | bingo | refresh | quit");
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "" => {}
            "quit" => break,
            "start" => match view.start_game().await {
                Ok(_) => println!("game started"),
                Err(err) => eprintln!("start failed: {err}"),
            },
            "draw" => match view.draw_number().await {
                Ok(drawn) => println!("drew {}", drawn.number),
                Err(err) => eprintln!("draw failed: {err}"),
            },
            "bingo" => match view.claim_bingo().await {
                Ok(()) => println!("claim submitted, waiting for the verdict"),
                Err(err) => eprintln!("claim failed: {err}"),
            },
            "refresh" => view.request_reload(),
            other => println!("unknown command: {other}"),
        }
    }

    printer.abort();
    notice_printer.abort();
    view.close();
    transport.shutdown();
    Ok(())
}

fn parse_rules(raw: &[String]) -> anyhow::Result<Vec<WinRule>> {
    raw.iter()
        .map(|rule| match rule.trim().to_lowercase().as_str() {
            "line" => Ok(WinRule::Line),
            "column" => Ok(WinRule::Column),
            "diagonal" => Ok(WinRule::Diagonal),
            "full" => Ok(WinRule::Full),
            other => anyhow::bail!("unknown rule '{other}' (line, column, diagonal, full)"),
        })
        .collect()
}

fn print_state(state: &RoomState, identity: &ResolvedIdentity) {
    let Some(room) = &state.room else {
        return;
    };
    println!("\n=== {} ({}) ===", room.name, room.code);
    println!("participants: {} / {}", room.visitors.len(), room.max_cards);
    if state.is_host {
        println!("you are the host");
    }

    match &state.game {
        None => println!("waiting for the host to start the game"),
        Some(game) => {
            if game.drawn_numbers.is_empty() {
                println!("no numbers drawn yet");
            } else {
                let drawn: Vec<String> =
                    game.drawn_numbers.iter().map(|n| n.to_string()).collect();
                println!("drawn: {}", drawn.join(" "));
            }
            if let Some(winner) = &game.winner {
                if winner == &identity.id {
                    match state.winning {
                        Some(pattern) => println!("BINGO! You won ({pattern})"),
                        None => println!("BINGO! You won"),
                    }
                } else {
                    let name = game.owner_name_of(winner).unwrap_or("someone");
                    println!("{name} won this one");
                }
            }
        }
    }

    if let Some(card) = &state.my_card {
        println!("your card:");
        for (i, row) in card.cells.iter().enumerate() {
            let cells: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(j, cell)| {
                    let body = if cell.number == FREE_NUMBER {
                        " *".to_string()
                    } else {
                        format!("{:2}", cell.number)
                    };
                    let highlighted = state.winning.is_some_and(|w| w.covers(i, j));
                    if highlighted {
                        format!("»{body}«")
                    } else if card.is_marked(i, j) {
                        format!("[{body}]")
                    } else {
                        format!(" {body} ")
                    }
                })
                .collect();
            println!("  {}", cells.join(" "));
        }
    }
}
