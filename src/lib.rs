pub mod core;
pub mod storage;
pub mod schema;
pub mod index;
pub mod query;
pub mod auth;
pub mod queue;

/*
┌────────────────────────────────────────────────────────────────────────────────┐
│                            SLOTDB STRUCT ARCHITECTURE                           │
└────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── QUEUE LAYER ───────────────────────────────────┐
│  struct Serializer                     struct Ticket                           │
│  • queue: Sender<Request>   (FIFO)     • reply: Receiver<Result<Response>>     │
│  • worker: JoinHandle<Database>        fn wait()                               │
│     worker loop: authorize → Database::execute → reply                         │
└────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── CORE LAYER ────────────────────────────────────┐
│  struct Database                                                               │
│  • config: Config                     // line limit, cache size, home          │
│  • storage: Arc<StorageLayout>        // data/<db>/<col>/<fileKey>, meta/      │
│  • catalog: Catalog                   // persisted sidecar tables              │
│  • collections: (db, col) → CollectionState { index, cache }                  │
│  • _lock: FileLock                    // flock on <home>/.lock                 │
│                                                                                │
│  struct RecordId { file, line }  "<fileKey>.<line>"    type Record = Map       │
└────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── STORAGE LAYER ─────────────────────────────────┐
│  RecordStore ──plans──▶ FreeSpaceCollection   file → { full, blocks: [lo,hi] } │
│      │                                                                         │
│      └──drives──▶ Cursor { mode, index, lower, upper }                         │
│                    next(line) → Read | Write | Delete | Next | Jump            │
│  Catalog: free_space.json  schema.json  collections.json  index_keys.json      │
└────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── INDEX / QUERY LAYER ───────────────────────────┐
│  CollectionIndex                       FilterEvaluator                         │
│  • root: IndexNode (Schema-shaped)     • Compare: lookup_exact / lookup_all    │
│      Leaf { ty, IndexKey → PostingList }  • And/Or/Xor: sorted merges          │
│  • searchable: dotted leaf paths       • Not: all_ids − inner                  │
│  • all_ids: insertion order                                                    │
│  RecordCache (lru, FIFO via peek)      results: order → limit → project        │
└────────────────────────────────────────────────────────────────────────────────┘
*/
