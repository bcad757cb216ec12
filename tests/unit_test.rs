use fortio::*;
use tempfile::NamedTempFile;

// Record framing bytes are written in the unit's byte order, so expected file
// images are built with to_ne_bytes rather than hard-coded literals.
fn length_word(n: u32) -> [u8; 4] {
    n.to_ne_bytes()
}

fn memory_unit(number: i32, access: Access, unformatted: bool) -> (FileUnit, FileImage) {
    let file = MemoryFile::new();
    let image = file.contents();
    let mut unit = FileUnit::new(number);
    unit.frame_mut().predefine(Box::new(file));
    unit.access = access;
    unit.is_unformatted = Some(unformatted);
    (unit, image)
}

fn memory_unit_with(
    number: i32,
    access: Access,
    unformatted: bool,
    contents: &[u8],
) -> (FileUnit, FileImage) {
    let file = MemoryFile::with_contents(contents);
    let image = file.contents();
    let mut unit = FileUnit::new(number);
    unit.frame_mut().predefine(Box::new(file));
    unit.access = access;
    unit.is_unformatted = Some(unformatted);
    (unit, image)
}

fn temp_path(tmp: &NamedTempFile) -> Result<Vec<u8>> {
    Ok(tmp
        .path()
        .to_str()
        .ok_or(Error::NonUnicodePath)?
        .as_bytes()
        .to_vec())
}

fn write_record(unit: &mut FileUnit, payload: &[u8], handler: &mut IoErrorHandler) -> bool {
    unit.begin_unformatted_output(handler)
        && unit.emit(payload, 1, handler)
        && unit.advance_record(handler)
}

#[test]
fn direct_fixed_record_round_trip() -> Result<()> {
    let tmp = NamedTempFile::with_prefix("fortio-")?;
    let path = temp_path(&tmp)?;
    let mut handler = IoErrorHandler::new();

    let mut unit = FileUnit::new(10);
    unit.access = Access::Direct;
    unit.is_unformatted = Some(true);
    unit.open_recl = Some(8);
    unit.open_unit(
        Some(OpenStatus::Old),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path.clone()),
        Convert::Native,
        &mut handler,
    );
    handler.take_result()?;

    unit.set_direction(Direction::Output)?;
    assert!(unit.set_direct_rec(3, &mut handler));
    assert!(unit.emit(b"ABCDEFGH", 1, &mut handler));
    assert!(unit.advance_record(&mut handler));
    unit.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;

    // Records 1 and 2 exist but were never written
    assert_eq!(std::fs::read(tmp.path())?.len(), 24);

    unit.open_unit(
        Some(OpenStatus::Old),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path),
        Convert::Native,
        &mut handler,
    );
    handler.take_result()?;
    assert_eq!(unit.endfile_record_number, Some(4));

    unit.set_direction(Direction::Input)?;
    assert!(unit.set_direct_rec(3, &mut handler));
    assert!(unit.begin_reading_record(&mut handler));
    let mut buf = [0u8; 8];
    assert!(unit.receive(&mut buf, 1, &mut handler));
    assert_eq!(&buf, b"ABCDEFGH");
    assert_eq!(unit.current_record_number, 3);
    unit.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;

    Ok(())
}

#[test]
fn sequential_unformatted_records() -> Result<()> {
    let (mut unit, image) = memory_unit(20, Access::Sequential, true);
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Output)?;
    assert!(write_record(&mut unit, b"Hello", &mut handler));
    assert!(write_record(&mut unit, b"", &mut handler));
    unit.rewind(&mut handler);
    handler.take_result()?;

    let mut expected = Vec::new();
    expected.extend_from_slice(&length_word(5)); // header
    expected.extend_from_slice(b"Hello");
    expected.extend_from_slice(&length_word(5)); // footer
    expected.extend_from_slice(&length_word(0)); // empty record
    expected.extend_from_slice(&length_word(0));
    assert_eq!(*image.lock(), expected);

    unit.set_direction(Direction::Input)?;
    assert_eq!(unit.current_record_number, 1);

    assert!(unit.begin_reading_record(&mut handler));
    assert_eq!(unit.record_length, Some(4 + 5)); // length prefix + payload
    let mut buf = [0u8; 5];
    assert!(unit.receive(&mut buf, 1, &mut handler));
    assert_eq!(&buf, b"Hello");
    unit.finish_reading_record(&mut handler);
    assert_eq!(unit.current_record_number, 2);

    assert!(unit.begin_reading_record(&mut handler));
    assert_eq!(unit.record_length, Some(4)); // empty payload
    unit.finish_reading_record(&mut handler);
    assert_eq!(unit.current_record_number, 3);

    // The next record is the endfile record
    assert!(!unit.begin_reading_record(&mut handler));
    assert!(matches!(handler.take_result(), Err(Error::End)));

    Ok(())
}

#[test]
fn sequential_unformatted_backspace() -> Result<()> {
    let (mut unit, _image) = memory_unit(21, Access::Sequential, true);
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Output)?;
    assert!(write_record(&mut unit, &[b'a'; 10], &mut handler));
    assert!(write_record(&mut unit, &[b'b'; 20], &mut handler));
    unit.rewind(&mut handler);
    handler.take_result()?;

    unit.set_direction(Direction::Input)?;
    for expected in [&[b'a'; 10][..], &[b'b'; 20][..]] {
        assert!(unit.begin_reading_record(&mut handler));
        let mut buf = vec![0u8; expected.len()];
        assert!(unit.receive(&mut buf, 1, &mut handler));
        assert_eq!(buf, expected);
        unit.finish_reading_record(&mut handler);
    }
    assert_eq!(unit.current_record_number, 3);

    unit.backspace_record(&mut handler);
    handler.take_result()?;
    assert_eq!(unit.current_record_number, 2);
    assert_eq!(unit.frame_offset_in_file, 18); // start of record 2

    unit.backspace_record(&mut handler);
    handler.take_result()?;
    assert_eq!(unit.current_record_number, 1);
    assert_eq!(unit.frame_offset_in_file, 0);

    unit.backspace_record(&mut handler);
    assert!(matches!(
        handler.take_result(),
        Err(Error::BackspaceAtFirstRecord)
    ));

    // Record 1 reads normally again after backspacing to it
    assert!(unit.begin_reading_record(&mut handler));
    let mut buf = [0u8; 10];
    assert!(unit.receive(&mut buf, 1, &mut handler));
    assert_eq!(buf, [b'a'; 10]);

    Ok(())
}

#[test]
fn formatted_non_advancing_then_backspace() -> Result<()> {
    let (mut unit, image) = memory_unit(22, Access::Sequential, false);
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Output)?;
    assert!(unit.emit(b"abc", 1, &mut handler));
    unit.left_tab_limit = Some(unit.furthest_position_in_record);

    unit.backspace_record(&mut handler);
    handler.take_result()?;
    assert_eq!(unit.left_tab_limit, None);
    assert_eq!(unit.current_record_number, 1);

    // The record restarts; ending it now makes it empty
    assert!(unit.advance_record(&mut handler));
    assert_eq!(unit.current_record_number, 2);

    unit.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;
    assert_eq!(*image.lock(), b"\n");

    Ok(())
}

#[test]
fn append_positions_after_existing_bytes() -> Result<()> {
    let tmp = NamedTempFile::with_prefix("fortio-")?;
    std::fs::write(tmp.path(), b"0123456789abcdefg")?;
    let path = temp_path(&tmp)?;
    let mut handler = IoErrorHandler::new();

    let mut unit = FileUnit::new(23);
    unit.access = Access::Stream;
    unit.is_unformatted = Some(true);
    unit.open_unit(
        Some(OpenStatus::Old),
        Some(Action::ReadWrite),
        Position::Append,
        Some(path.clone()),
        Convert::Native,
        &mut handler,
    );
    handler.take_result()?;
    assert_eq!(unit.frame_offset_in_file, 17);

    unit.set_direction(Direction::Output)?;
    assert!(unit.emit(b"X", 1, &mut handler));
    assert!(unit.advance_record(&mut handler));
    unit.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;
    assert_eq!(std::fs::read(tmp.path())?, b"0123456789abcdefgX");

    // A record file opened for append fakes an endfile record number so that
    // BACKSPACE can work relative to the end
    let mut unit = FileUnit::new(24);
    unit.is_unformatted = Some(false);
    unit.open_unit(
        Some(OpenStatus::Old),
        Some(Action::ReadWrite),
        Position::Append,
        Some(path),
        Convert::Native,
        &mut handler,
    );
    handler.take_result()?;
    assert_eq!(unit.frame_offset_in_file, 18);
    assert_eq!(unit.endfile_record_number, Some(i64::MAX - 2));
    assert_eq!(unit.current_record_number, i64::MAX - 2);
    unit.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;

    Ok(())
}

#[test]
fn formatted_records_round_trip() -> Result<()> {
    let (mut unit, image) = memory_unit(25, Access::Sequential, false);
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Output)?;
    assert!(unit.emit(b"Hello", 1, &mut handler));
    assert!(unit.advance_record(&mut handler));
    assert!(unit.emit(b"World!", 1, &mut handler));
    assert!(unit.advance_record(&mut handler));
    unit.rewind(&mut handler);
    handler.take_result()?;
    assert_eq!(*image.lock(), b"Hello\nWorld!\n");

    unit.set_direction(Direction::Input)?;
    assert!(unit.begin_reading_record(&mut handler));
    assert_eq!(unit.record_length, Some(5));
    assert_eq!(unit.get_next_input_bytes(&mut handler), b"Hello");
    let mut buf = [0u8; 5];
    assert!(unit.receive(&mut buf, 1, &mut handler));
    assert_eq!(&buf, b"Hello");
    unit.finish_reading_record(&mut handler);

    assert!(unit.begin_reading_record(&mut handler));
    assert_eq!(unit.record_length, Some(6));
    unit.finish_reading_record(&mut handler);
    assert_eq!(unit.current_record_number, 3);

    assert!(!unit.begin_reading_record(&mut handler));
    assert!(matches!(handler.take_result(), Err(Error::End)));

    Ok(())
}

#[test]
fn final_record_without_newline_is_unterminated() -> Result<()> {
    let (mut unit, _image) = memory_unit_with(26, Access::Sequential, false, b"abc");
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Input)?;
    assert!(unit.begin_reading_record(&mut handler));
    assert_eq!(unit.record_length, Some(3));
    assert!(unit.unterminated_record);
    let mut buf = [0u8; 3];
    assert!(unit.receive(&mut buf, 1, &mut handler));
    assert_eq!(&buf, b"abc");
    unit.finish_reading_record(&mut handler);

    assert!(!unit.begin_reading_record(&mut handler));
    assert!(matches!(handler.take_result(), Err(Error::End)));
    Ok(())
}

#[test]
fn record_write_overrun_is_signaled() -> Result<()> {
    let (mut unit, _image) = memory_unit(27, Access::Direct, true);
    let mut handler = IoErrorHandler::new();
    unit.open_recl = Some(8);

    unit.set_direction(Direction::Output)?;
    assert!(unit.set_direct_rec(1, &mut handler));
    assert!(!unit.emit(b"too long:pqr", 1, &mut handler));
    assert!(matches!(
        handler.take_result(),
        Err(Error::RecordWriteOverrun { .. })
    ));
    assert_eq!(unit.position_in_record, 0);

    // Exactly RECL bytes still fit
    assert!(unit.emit(b"12345678", 1, &mut handler));
    handler.take_result()?;
    Ok(())
}

#[test]
fn record_read_overrun_is_signaled() -> Result<()> {
    let (mut unit, _image) = memory_unit_with(28, Access::Sequential, false, b"Hello\n");
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Input)?;
    assert!(unit.begin_reading_record(&mut handler));
    let mut buf = [0u8; 6];
    assert!(!unit.receive(&mut buf, 1, &mut handler));
    assert!(matches!(
        handler.take_result(),
        Err(Error::RecordReadOverrun { .. })
    ));
    assert_eq!(unit.position_in_record, 0);

    let mut buf = [0u8; 5];
    assert!(unit.receive(&mut buf, 1, &mut handler));
    assert_eq!(&buf, b"Hello");
    Ok(())
}

#[test]
fn endian_swapped_unit_round_trips() -> Result<()> {
    let tmp = NamedTempFile::with_prefix("fortio-")?;
    let path = temp_path(&tmp)?;
    let mut handler = IoErrorHandler::new();

    let mut unit = FileUnit::new(29);
    unit.open_unit(
        Some(OpenStatus::Old),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path.clone()),
        Convert::Swap,
        &mut handler,
    );
    handler.take_result()?;
    unit.is_unformatted = Some(true);
    assert!(unit.swap_endianness);

    unit.set_direction(Direction::Output)?;
    assert!(unit.begin_unformatted_output(&mut handler));
    assert!(unit.emit(&0x01020304u32.to_ne_bytes(), 4, &mut handler));
    assert!(unit.advance_record(&mut handler));
    unit.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;

    // Both the framing words and the payload land byte-reversed
    let mut header = length_word(4);
    header.reverse();
    let mut payload = 0x01020304u32.to_ne_bytes();
    payload.reverse();
    let mut expected = Vec::new();
    expected.extend_from_slice(&header);
    expected.extend_from_slice(&payload);
    expected.extend_from_slice(&header);
    assert_eq!(std::fs::read(tmp.path())?, expected);

    unit.open_unit(
        Some(OpenStatus::Old),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path),
        Convert::Swap,
        &mut handler,
    );
    handler.take_result()?;
    unit.set_direction(Direction::Input)?;
    assert!(unit.begin_reading_record(&mut handler));
    assert_eq!(unit.record_length, Some(8));
    let mut buf = [0u8; 4];
    assert!(unit.receive(&mut buf, 4, &mut handler));
    assert_eq!(u32::from_ne_bytes(buf), 0x01020304);
    unit.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;

    Ok(())
}

#[test]
fn advance_then_backspace_restores_record_number() -> Result<()> {
    let (mut unit, _image) = memory_unit(31, Access::Sequential, false);
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Output)?;
    assert!(unit.emit(b"xyz", 1, &mut handler));
    let before = unit.current_record_number;
    assert!(unit.advance_record(&mut handler));
    assert_eq!(unit.current_record_number, before + 1);

    unit.backspace_record(&mut handler);
    handler.take_result()?;
    assert_eq!(unit.current_record_number, before);
    assert_eq!(unit.record_length, Some(3));
    Ok(())
}

#[test]
fn write_after_explicit_endfile_is_signaled() -> Result<()> {
    let (mut unit, _image) = memory_unit(32, Access::Sequential, false);
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Output)?;
    assert!(unit.emit(b"last", 1, &mut handler));
    assert!(unit.advance_record(&mut handler));
    unit.endfile(&mut handler);
    handler.take_result()?;
    assert_eq!(unit.endfile_record_number, Some(2));
    assert_eq!(unit.current_record_number, 3);

    assert!(!unit.emit(b"no", 1, &mut handler));
    assert!(matches!(
        handler.take_result(),
        Err(Error::WriteAfterEndfile { .. })
    ));

    // BACKSPACE lands on the endfile record
    unit.backspace_record(&mut handler);
    handler.take_result()?;
    assert_eq!(unit.current_record_number, 2);
    Ok(())
}

#[test]
fn positioning_statements_guard_access_modes() -> Result<()> {
    let (mut unit, _image) = memory_unit(33, Access::Direct, true);
    unit.open_recl = Some(4);
    let mut handler = IoErrorHandler::new();

    unit.endfile(&mut handler);
    assert!(matches!(
        handler.take_result(),
        Err(Error::EndfileDirect { .. })
    ));
    unit.rewind(&mut handler);
    assert!(matches!(
        handler.take_result(),
        Err(Error::RewindNonSequential { .. })
    ));
    unit.backspace_record(&mut handler);
    assert!(matches!(
        handler.take_result(),
        Err(Error::BackspaceNonSequential { .. })
    ));
    assert!(!unit.set_stream_pos(1, &mut handler));
    assert!(matches!(handler.take_result(), Err(Error::PosOnNonStream)));

    let (mut unit, _image) = memory_unit(34, Access::Stream, true);
    assert!(!unit.set_direct_rec(1, &mut handler));
    assert!(matches!(handler.take_result(), Err(Error::RecOnNonDirect)));

    assert!(unit.set_stream_pos(5, &mut handler));
    handler.take_result()?;
    assert_eq!(unit.frame_offset_in_file, 4);
    assert_eq!(unit.current_record_number, i64::MAX / 2);
    assert_eq!(unit.endfile_record_number, None);

    assert!(!unit.set_stream_pos(0, &mut handler));
    assert!(matches!(
        handler.take_result(),
        Err(Error::BadStreamPos { .. })
    ));
    Ok(())
}

#[test]
fn direct_transfer_requires_rec() -> Result<()> {
    let (mut unit, _image) = memory_unit(35, Access::Direct, true);
    unit.open_recl = Some(4);
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Output)?;
    assert!(!unit.emit(b"data", 1, &mut handler));
    assert!(matches!(
        handler.take_result(),
        Err(Error::MissingDirectRec)
    ));

    assert!(unit.set_direct_rec(1, &mut handler));
    assert!(unit.emit(b"data", 1, &mut handler));
    handler.take_result()?;
    Ok(())
}

#[test]
fn direct_output_pads_short_records() -> Result<()> {
    let (mut unit, image) = memory_unit(36, Access::Direct, false);
    unit.open_recl = Some(6);
    let mut handler = IoErrorHandler::new();

    unit.set_direction(Direction::Output)?;
    assert!(unit.set_direct_rec(2, &mut handler));
    assert!(unit.emit(b"ab", 1, &mut handler));
    assert!(unit.advance_record(&mut handler));
    unit.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;

    // Record 2 is space-filled to RECL; record 1 was never written
    assert_eq!(&image.lock()[6..12], b"ab    ");
    Ok(())
}

#[test]
fn scratch_unit_round_trips() -> Result<()> {
    let mut unit = FileUnit::new(37);
    unit.is_unformatted = Some(false);
    let mut handler = IoErrorHandler::new();
    unit.open_unit(
        Some(OpenStatus::Scratch),
        None,
        Position::Rewind,
        None,
        Convert::Native,
        &mut handler,
    );
    handler.take_result()?;
    assert!(unit.is_connected());
    assert_eq!(unit.path(), None);

    unit.set_direction(Direction::Output)?;
    assert!(unit.emit(b"scratch data", 1, &mut handler));
    assert!(unit.advance_record(&mut handler));
    unit.rewind(&mut handler);
    handler.take_result()?;

    unit.set_direction(Direction::Input)?;
    assert!(unit.begin_reading_record(&mut handler));
    let mut buf = [0u8; 12];
    assert!(unit.receive(&mut buf, 1, &mut handler));
    assert_eq!(&buf, b"scratch data");
    unit.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;
    Ok(())
}

#[test]
fn open_of_a_connected_file_is_signaled() -> Result<()> {
    let tmp = NamedTempFile::with_prefix("fortio-")?;
    let path = temp_path(&tmp)?;
    let mut handler = IoErrorHandler::new();

    let mut first = FileUnit::new(41);
    first.open_unit(
        Some(OpenStatus::Old),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path.clone()),
        Convert::Native,
        &mut handler,
    );
    handler.take_result()?;

    let mut second = FileUnit::new(42);
    second.open_unit(
        Some(OpenStatus::Old),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path.clone()),
        Convert::Native,
        &mut handler,
    );
    match handler.take_result() {
        Err(Error::OpenAlreadyConnected { unit, other, .. }) => {
            assert_eq!(unit, 42);
            assert_eq!(other, 41);
        }
        other => panic!("expected OpenAlreadyConnected, got {other:?}"),
    }

    // Re-opening the same unit with the same path keeps the connection
    assert!(!first.open_unit(
        None,
        None,
        Position::Rewind,
        Some(path.clone()),
        Convert::Native,
        &mut handler,
    ));
    handler.take_result()?;

    // ...but an explicit STATUS= other than OLD is rejected
    first.open_unit(
        Some(OpenStatus::New),
        None,
        Position::Rewind,
        Some(path.clone()),
        Convert::Native,
        &mut handler,
    );
    assert!(matches!(
        handler.take_result(),
        Err(Error::OpenBadStatusOnConnectedUnit)
    ));

    first.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;

    // The path is free again after CLOSE
    second.open_unit(
        Some(OpenStatus::Old),
        Some(Action::ReadWrite),
        Position::Rewind,
        Some(path),
        Convert::Native,
        &mut handler,
    );
    handler.take_result()?;
    second.close_unit(CloseStatus::Keep, &mut handler);
    handler.take_result()?;
    Ok(())
}

#[test]
fn anonymous_unit_connects_a_local_file() -> Result<()> {
    let mut handler = IoErrorHandler::new();
    let unit_ref = unit_map::look_up_or_create_anonymous(
        8123,
        Direction::Output,
        Some(false),
        &mut handler,
    );
    handler.take_result()?;
    {
        let unit = unit_ref.lock();
        assert!(unit.is_connected());
        assert_eq!(unit.path(), Some(&b"fort.8123"[..]));
        assert_eq!(unit.is_unformatted, Some(false));
    }

    let closing = unit_map::look_up_for_close(8123).expect("anonymous unit is missing");
    closing.lock().close_unit(CloseStatus::Delete, &mut handler);
    handler.take_result()?;
    unit_map::destroy_closed(8123);
    assert!(unit_map::look_up(8123).is_none());
    assert!(!std::path::Path::new("fort.8123").exists());
    Ok(())
}

#[test]
fn asynchronous_ids_are_distinct_until_waited() -> Result<()> {
    let (mut unit, _image) = memory_unit(43, Access::Sequential, true);
    let mut handler = IoErrorHandler::new();

    let mut ids = Vec::new();
    for _ in 0..5 {
        let id = unit.get_asynchronous_id(&mut handler);
        handler.take_result()?;
        assert!(id > 0);
        assert!(!ids.contains(&id));
        ids.push(id);
    }

    // WAIT with ID=0 completes everything
    assert!(unit.wait(0));
    let id = unit.get_asynchronous_id(&mut handler);
    handler.take_result()?;
    assert_eq!(id, ids[0]);
    assert!(unit.wait(id));
    assert!(!unit.wait(id));
    Ok(())
}

#[test]
fn child_io_stack_pushes_and_pops() {
    let (mut unit, _image) = memory_unit(44, Access::Sequential, false);

    let outer = unit.push_child_io(ParentIo {
        unformatted: false,
        direction: Direction::Output,
    });
    assert!(unit
        .child_io()
        .unwrap()
        .check_formatting_and_direction(false, Direction::Output)
        .is_ok());
    assert!(matches!(
        unit.child_io()
            .unwrap()
            .check_formatting_and_direction(true, Direction::Output),
        Err(Error::UnformattedChildOnFormattedParent)
    ));

    let inner = unit.push_child_io(ParentIo {
        unformatted: false,
        direction: Direction::Input,
    });
    assert!(matches!(
        unit.child_io()
            .unwrap()
            .check_formatting_and_direction(false, Direction::Output),
        Err(Error::ChildOutputToInputParent)
    ));

    unit.pop_child_io(inner);
    unit.pop_child_io(outer);
    assert!(unit.child_io().is_none());
}

#[test]
#[should_panic(expected = "not the top of the stack")]
fn popping_a_stale_child_io_panics() {
    let (mut unit, _image) = memory_unit(45, Access::Sequential, false);
    let outer = unit.push_child_io(ParentIo {
        unformatted: false,
        direction: Direction::Output,
    });
    unit.push_child_io(ParentIo {
        unformatted: false,
        direction: Direction::Output,
    });
    unit.pop_child_io(outer);
}
