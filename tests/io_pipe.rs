#![cfg(unix)]

use core::time::Duration;
use std::{
    io::{self, Read, Write},
    thread,
};

use brigade::{
    io::{pipe, Source},
    Brigade, Bucket, BucketAllocator, BucketKind, Pool, ReadMode,
};

#[test]
fn pipe_read_write() -> io::Result<()> {
    let (mut reader, mut writer) = pipe()?;

    let case = "written";
    writer.write_all(b"through the pipe")?;
    let mut buf = [0; 64];
    let n = reader.read(&mut buf)?;
    assert_eq!(&buf[..n], b"through the pipe", "{case}");

    let case = "timed out";
    reader.set_timeout(Some(Duration::from_millis(20)))?;
    assert_eq!(reader.timeout()?, Some(Duration::from_millis(20)), "{case}");
    let err = reader.read(&mut buf).expect_err(case);
    assert_eq!(err.kind(), io::ErrorKind::TimedOut, "{case}");

    let case = "non-blocking";
    reader.set_timeout(Some(Duration::ZERO))?;
    let err = reader.read(&mut buf).expect_err(case);
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock, "{case}");

    let case = "writer closed";
    drop(writer);
    assert_eq!(reader.read(&mut buf)?, 0, "{case}");

    let case = "reader closed";
    reader.close()?;
    assert!(reader.is_closed(), "{case}");
    let err = reader.read(&mut buf).expect_err(case);
    assert_eq!(err.kind(), io::ErrorKind::NotConnected, "{case}");
    reader.close().expect("closing twice is a no-op");
    Ok(())
}

#[test]
fn pipe_bucket_read() -> io::Result<()> {
    let (reader, mut writer) = pipe()?;
    let mut bucket = Bucket::pipe(reader);
    assert_eq!(bucket.length(), None);

    let case = "nothing written";
    let err = bucket.read(ReadMode::NonBlock).expect_err(case);
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock, "{case}");
    assert_eq!(bucket.kind(), BucketKind::Pipe, "{case}");

    let case = "written";
    writer.write_all(b"chunk")?;
    let (data, rest) = bucket.read(ReadMode::NonBlock)?;
    assert_eq!(data, b"chunk", "{case}");
    assert_eq!(bucket.kind(), BucketKind::Heap, "{case}");
    let mut rest = rest.expect(case);
    assert_eq!(rest.kind(), BucketKind::Pipe, "{case}");

    let case = "ended";
    drop(writer);
    let (data, next) = rest.read(ReadMode::Block)?;
    assert!(data.is_empty(), "{case}");
    assert!(next.is_none(), "{case}");
    assert_eq!(rest.kind(), BucketKind::Immortal, "{case}");
    assert_eq!(rest.length(), Some(0), "{case}");
    Ok(())
}

#[test]
fn brigade_reads_pipe_to_end() -> io::Result<()> {
    let (reader, mut writer) = pipe()?;
    #[allow(clippy::cast_possible_truncation)]
    let content: Vec<u8> = (0..100_000).map(|i| (i % 253) as u8).collect();
    let written = content.clone();
    let producer = thread::spawn(move || writer.write_all(&written));

    let pool = Pool::new();
    let allocator = BucketAllocator::new(&pool);
    let mut bb = Brigade::new(&pool, &allocator);
    bb.push_back(Bucket::pipe(reader));
    bb.push_back(Bucket::eos());

    let case = "unknown length";
    assert_eq!(bb.length(false)?, None, "{case}");

    let case = "read to the end";
    assert_eq!(bb.flatten_to_vec()?, content, "{case}");
    producer.join().expect("producer")?;
    let kinds: Vec<_> = bb.iter().map(Bucket::kind).collect();
    assert_eq!(kinds.last(), Some(&BucketKind::Eos), "{case}");
    assert!(
        kinds[..kinds.len() - 2].iter().all(|kind| *kind == BucketKind::Heap),
        "{case}"
    );
    assert_eq!(kinds[kinds.len() - 2], BucketKind::Immortal, "{case}");
    assert_eq!(bb.length(false)?, Some(content.len()), "{case}");
    Ok(())
}
